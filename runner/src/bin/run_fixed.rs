//! Fixed-base launcher.
//!
//! Linked at the payload's declared base without relocations. The payload
//! is loaded into `.exebuf`, a zero-initialised section that has to be the
//! first section of this executable so that it starts at RVA `0x1000`.
//! Placement is re-checked at run time before anything is written.

use pefrm_loader::ImageRegion;
use pefrm_runner::{logger, read_image, run_fixed, terminate, RunnerConfig, RunnerResult};
use pefrm_runner::DEFAULT_FIXED_IMAGE;

#[cfg(windows)]
mod buffer {
    use core::cell::UnsafeCell;
    use core::ptr::NonNull;

    use pefrm_loader::{ImageRegion, FIXED_BASE_OFFSET};
    use pefrm_runner::launch::FIXED_BUFFER_LEN;

    #[repr(C, align(4096))]
    struct ExeBuffer(UnsafeCell<[u8; FIXED_BUFFER_LEN]>);

    // SAFETY: only reachable through `claim`, which hands it out once.
    unsafe impl Sync for ExeBuffer {}

    #[link_section = ".exebuf"]
    #[used]
    static EXE_BUFFER: ExeBuffer = ExeBuffer(UnsafeCell::new([0; FIXED_BUFFER_LEN]));

    static CLAIMED: spin::Mutex<bool> = spin::Mutex::new(false);

    /// Hand out the reserved buffer, at most once per process
    pub fn claim() -> Option<ImageRegion> {
        let mut claimed = CLAIMED.lock();
        if *claimed {
            return None;
        }
        *claimed = true;

        let ptr = NonNull::new(EXE_BUFFER.0.get().cast::<u8>())?;
        // SAFETY: the buffer is static, never touched elsewhere, and the
        // guard above makes this the only region over it.
        Some(unsafe { ImageRegion::from_raw(ptr, FIXED_BUFFER_LEN, FIXED_BASE_OFFSET) })
    }
}

#[cfg(windows)]
fn claim_buffer() -> Option<ImageRegion> {
    buffer::claim()
}

#[cfg(not(windows))]
fn claim_buffer() -> Option<ImageRegion> {
    None
}

fn run(config: &RunnerConfig) -> RunnerResult<()> {
    let image = read_image(&config.image_path)?;
    let outcome = run_fixed(config, &image, claim_buffer)?;
    log::info!("{}", outcome);
    Ok(())
}

fn main() {
    let config = RunnerConfig::from_env(DEFAULT_FIXED_IMAGE);
    logger::init(config.log_level);
    log::debug!("{:?}", config);

    if let Err(err) = run(&config) {
        terminate(&err);
    }
}
