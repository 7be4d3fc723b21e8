//
// main.rs
// dicomweb-static
//
// Entry point that hands off execution to the CLI layer.
//

use dicomweb_static::cli;

fn main() -> anyhow::Result<()> {
    // Delegate all argument parsing and dispatching to the CLI module.
    cli::run()
}
