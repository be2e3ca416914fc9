use anyhow::Result;
use clap::Parser;
use tracing::error;
use wlg_bench::cli::{self, Outcome};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    match cli::dispatch(args) {
        Ok(Outcome::Ok) => Ok(()),
        Ok(Outcome::TargetsMissed) => std::process::exit(2),
        Err(err) => {
            if tracing::dispatcher::has_been_set() {
                error!("{:#}", err);
            } else {
                eprintln!("error: {:#}", err);
            }
            std::process::exit(1);
        }
    }
}
