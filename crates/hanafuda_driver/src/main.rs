use clap::Parser;
use hanafuda_driver::{run, Cli};

fn main() {
    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let ok = match run(&cli) {
        Ok(ok) => ok,
        Err(err) => {
            log::error!("{:#}", err);
            false
        }
    };
    if !ok {
        std::process::exit(1);
    }
}
