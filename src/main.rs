use anyhow::Context;
use colored::Colorize;
use warden::core::error::{EXIT_SETUP, WardenError};

fn main() {
    match warden::run().context("warden failed") {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            let code = e
                .downcast_ref::<WardenError>()
                .map(WardenError::exit_code)
                .unwrap_or(EXIT_SETUP);
            std::process::exit(code);
        }
    }
}
