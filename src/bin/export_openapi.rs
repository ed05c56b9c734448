//! Dumps the gateway's OpenAPI document as pretty-printed JSON.
//!
//! Writes to stdout by default so it composes with shell redirection;
//! `--output <path>` (or `-o`) writes to a file instead:
//!
//!   cargo run --bin export_openapi > openapi.json
//!   cargo run --bin export_openapi -- -o docs/openapi.json

use riskgate::gateway::openapi::ApiDoc;
use utoipa::OpenApi;

fn output_path() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--output" || arg == "-o" {
            return args.next();
        }
    }
    None
}

fn main() -> std::io::Result<()> {
    let json = ApiDoc::openapi()
        .to_pretty_json()
        .map_err(std::io::Error::other)?;

    match output_path() {
        Some(path) => {
            std::fs::write(&path, &json)?;
            eprintln!("OpenAPI document written to {path}");
        }
        None => println!("{json}"),
    }
    Ok(())
}
