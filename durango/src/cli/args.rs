// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    io::{self, IsTerminal},
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

use crate::cli::{completion, drive, nand, savegame, xvd, xvi};

#[derive(Debug, Subcommand)]
pub enum Command {
    Completion(completion::CompletionCli),
    Drive(drive::DriveCli),
    Nand(nand::NandCli),
    Savegame(savegame::SavegameCli),
    Xvd(xvd::XvdCli),
    Xvi(xvi::XviCli),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_level(self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Lowest log message severity to output.
    #[arg(long, global = true, value_name = "LEVEL", value_enum, default_value_t)]
    pub log_level: LogLevel,
}

/// Log to stderr so that stdout only contains command output.
pub fn init_logging(log_level: LogLevel) {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_max_level(log_level.as_level())
        .without_time()
        .with_target(false)
        .init();
}

pub fn main(logging_initialized: &AtomicBool, cancel_signal: &AtomicBool) -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_level);
    logging_initialized.store(true, Ordering::SeqCst);

    match cli.command {
        Command::Completion(c) => completion::completion_main(&c),
        Command::Drive(c) => drive::drive_main(&c),
        Command::Nand(c) => nand::nand_main(&c, cancel_signal),
        Command::Savegame(c) => savegame::savegame_main(&c),
        Command::Xvd(c) => xvd::xvd_main(&c, cancel_signal),
        Command::Xvi(c) => xvi::xvi_main(&c),
    }
}
