use anyhow::Result;

mod app;
mod logging;

fn main() -> Result<()> {
    let args = pog_cache::cli::parse();
    app::run(args)
}
