use clap::Parser;
use log::{error, LevelFilter};

use termux_bot::args::Args;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = args.log_level {
        builder.filter_level(level);
    }
    // Chatty HTTP internals stay at warn unless asked for
    if args.log_level != Some(LevelFilter::Trace) {
        builder.filter_module("reqwest", LevelFilter::Warn);
        builder.filter_module("hyper_util", LevelFilter::Warn);
    }
    builder.init();

    if let Err(e) = termux_bot::run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
