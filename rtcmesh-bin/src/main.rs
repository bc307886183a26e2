use clap::Parser;
use rtcmesh_cli::Cli;
use rtcmesh_core::ErrorKind;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        eprintln!("❌ {}", e.message());
        // Configuration errors exit with 2.
        let code = if e.kind() == ErrorKind::Config { 2 } else { 1 };
        std::process::exit(code);
    }
}
