//! Relocating launcher: maps the image at any address and enters it.

use pefrm_runner::{logger, read_image, run_relocatable, terminate, RunnerConfig, RunnerResult};
use pefrm_runner::DEFAULT_RELOCATABLE_IMAGE;

fn run(config: &RunnerConfig) -> RunnerResult<()> {
    let image = read_image(&config.image_path)?;
    let outcome = run_relocatable(config, &image)?;
    log::info!("{}", outcome);
    Ok(())
}

fn main() {
    let config = RunnerConfig::from_env(DEFAULT_RELOCATABLE_IMAGE);
    logger::init(config.log_level);
    log::debug!("{:?}", config);

    if let Err(err) = run(&config) {
        terminate(&err);
    }
}
