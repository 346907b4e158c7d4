//! # Launch Sequences
//!
//! Read the image, pick the host, run the loader. A dry run uses the
//! simulated host with a stub entry; a native run uses the Windows host and
//! calls the entry point for real. The simulated host reports the machine
//! from [`RunnerConfig::dry_run_machine`], so a dry run rejects the same
//! architectures a native run on that machine would.

use std::fs;
use std::path::Path;

use pefrm_image::ImageDescription;
use pefrm_loader::host::simulated::SimulatedHost;
use pefrm_loader::{
    EntryInvoker, FixedBase, Host, ImageRegion, LoadOutcome, Loader, Relocatable, ReservationStrategy, StubEntry,
    FIXED_BASE_OFFSET, FIXED_REQUIRED_IMAGE_SIZE,
};

use crate::config::RunnerConfig;
use crate::error::{RunnerError, RunnerResult};

/// Fallback when the build-time base does not parse
const DEFAULT_FIXED_LOAD_ADDRESS: u64 = 0x40_0000;

/// Bytes the fixed-base buffer spans
pub const FIXED_BUFFER_LEN: usize = (FIXED_REQUIRED_IMAGE_SIZE - FIXED_BASE_OFFSET) as usize;

/// Parse `0x`-prefixed hex or plain decimal
pub fn parse_address(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Base address the fixed-base launcher was linked at
pub fn fixed_load_address() -> u64 {
    parse_address(env!("PEFRM_FIXED_BASE")).unwrap_or(DEFAULT_FIXED_LOAD_ADDRESS)
}

/// Read and decode the image file
pub fn read_image(path: &Path) -> RunnerResult<ImageDescription> {
    let bytes = fs::read(path).map_err(|source| RunnerError::ImageUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("read {} ({} bytes)", path.display(), bytes.len());
    Ok(pefrm_image::decode(&bytes)?)
}

fn execute<H, S, E>(
    host: &mut H,
    config: &RunnerConfig,
    image: &ImageDescription,
    strategy: &mut S,
    entry: &mut E,
) -> RunnerResult<LoadOutcome>
where
    H: Host,
    S: ReservationStrategy,
    E: EntryInvoker,
{
    let outcome = Loader::with_config(host, config.loader.clone()).load(image, strategy, entry)?;
    Ok(outcome)
}

/// Load `image` into fresh memory, relocating it
pub fn run_relocatable(config: &RunnerConfig, image: &ImageDescription) -> RunnerResult<LoadOutcome> {
    if config.dry_run {
        log::info!("dry run: simulated {} host, entry point not executed", config.dry_run_machine);
        let mut host = SimulatedHost::permissive(config.dry_run_machine);
        return execute(&mut host, config, image, &mut Relocatable, &mut StubEntry::new());
    }
    native::run_relocatable(config, image)
}

/// Load `image` into the launcher's reserved buffer at its declared base.
///
/// `claim_buffer` hands over the reserved region; it is only called for a
/// native run.
pub fn run_fixed<F>(config: &RunnerConfig, image: &ImageDescription, claim_buffer: F) -> RunnerResult<LoadOutcome>
where
    F: FnOnce() -> Option<ImageRegion>,
{
    if config.dry_run {
        let load_address = fixed_load_address();
        log::info!("dry run: simulated buffer at {:#x}, entry point not executed", load_address);
        let mut host = SimulatedHost::permissive(config.dry_run_machine);
        let region = ImageRegion::owned_window(load_address, FIXED_BASE_OFFSET, FIXED_BUFFER_LEN, 0);
        let mut strategy = FixedBase::new(load_address, region);
        return execute(&mut host, config, image, &mut strategy, &mut StubEntry::new());
    }
    native::run_fixed(config, image, claim_buffer)
}

/// Report `error` and exit with its code
pub fn terminate(error: &RunnerError) -> ! {
    let code = error.exit_code();
    log::logger().flush();
    eprintln!("pefrm: {} (exit code {})", error, code);
    std::process::exit(code)
}

#[cfg(windows)]
mod native {
    use super::*;
    use pefrm_loader::host::windows::WindowsHost;
    use pefrm_loader::{LoadError, NativeEntry};

    fn acquire_host() -> RunnerResult<WindowsHost> {
        WindowsHost::acquire().ok_or(RunnerError::HostInUse)
    }

    pub(super) fn run_relocatable(config: &RunnerConfig, image: &ImageDescription) -> RunnerResult<LoadOutcome> {
        let mut host = acquire_host()?;
        // SAFETY: the loader only invokes the entry of an image it fully prepared.
        let mut entry = unsafe { NativeEntry::new() };
        execute(&mut host, config, image, &mut Relocatable, &mut entry)
    }

    pub(super) fn run_fixed<F>(config: &RunnerConfig, image: &ImageDescription, claim_buffer: F) -> RunnerResult<LoadOutcome>
    where
        F: FnOnce() -> Option<ImageRegion>,
    {
        let mut host = acquire_host()?;
        let region = claim_buffer().ok_or(LoadError::ReservationFailure { size: FIXED_BUFFER_LEN })?;
        let own_base = host.own_image_base();
        log::debug!("launcher base {:#x}, buffer at {:#x}", own_base, region.address_of(FIXED_BASE_OFFSET));

        let mut strategy = FixedBase::new(own_base, region);
        // SAFETY: as above.
        let mut entry = unsafe { NativeEntry::new() };
        execute(&mut host, config, image, &mut strategy, &mut entry)
    }
}

#[cfg(not(windows))]
mod native {
    use super::*;

    pub(super) fn run_relocatable(_config: &RunnerConfig, _image: &ImageDescription) -> RunnerResult<LoadOutcome> {
        Err(RunnerError::UnsupportedHost)
    }

    pub(super) fn run_fixed<F>(_config: &RunnerConfig, _image: &ImageDescription, _claim_buffer: F) -> RunnerResult<LoadOutcome>
    where
        F: FnOnce() -> Option<ImageRegion>,
    {
        Err(RunnerError::UnsupportedHost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pefrm_image::{
        ImportDescriptor, ImportedFunction, Machine, RelocationBlock, RelocationEntry, Section, SectionFlags,
    };
    use pefrm_loader::{LoadError, LoaderConfig};

    fn dry_config(machine: Machine) -> RunnerConfig {
        RunnerConfig {
            image_path: "calc.exe".into(),
            log_level: log::LevelFilter::Off,
            loader: LoaderConfig::default(),
            dry_run: true,
            dry_run_machine: machine,
        }
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x400000"), Some(0x40_0000));
        assert_eq!(parse_address(" 0X1000 "), Some(0x1000));
        assert_eq!(parse_address("4096"), Some(4096));
        assert_eq!(parse_address("0xZZ"), None);
        assert_eq!(parse_address(""), None);
    }

    #[test]
    fn test_missing_image_file() {
        let err = read_image(Path::new("definitely/not/here.exe")).unwrap_err();
        assert!(matches!(err, RunnerError::ImageUnreadable { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_dry_run_relocatable() {
        let mut image = ImageDescription::new(Machine::Amd64, 0x1_4000_0000, 0x3000);
        image.dynamic_base = true;
        image.entry_point = 0x1000;
        image
            .sections
            .push(Section::new(".text", 0x1000, 0x10, SectionFlags::READ | SectionFlags::EXECUTE).with_data(vec![0xC3]));
        image
            .relocations
            .push(RelocationBlock::new(0x1000).with_entry(0x8, RelocationEntry::DIR64));
        image.imports.push(
            ImportDescriptor::new("kernel32.dll", 0x2000).with_function(ImportedFunction::named("ExitProcess")),
        );

        let outcome = run_relocatable(&dry_config(Machine::Amd64), &image).unwrap();
        let LoadOutcome::Returned {
            entry_address,
            actual_base,
            stats,
        } = outcome;
        assert_eq!(entry_address, actual_base + 0x1000);
        assert_eq!(stats.functions_bound, 1);
    }

    #[test]
    fn test_dry_run_fixed_checks_placement() {
        let mut image = ImageDescription::new(Machine::I386, fixed_load_address() + 0x1000, 0x3000);
        image.sections.push(Section::new(".text", 0x1000, 0x10, SectionFlags::READ));

        let err = run_fixed(&dry_config(Machine::I386), &image, || None).unwrap_err();
        assert_eq!(err.exit_code(), 6);

        image.image_base = fixed_load_address();
        assert!(run_fixed(&dry_config(Machine::I386), &image, || None).is_ok());
    }

    #[test]
    fn test_dry_run_rejects_foreign_machine() {
        let mut image = ImageDescription::new(Machine::I386, 0x40_0000, 0x2000);
        image.dynamic_base = true;
        image.entry_point = 0x1000;
        image.sections.push(Section::new(".text", 0x1000, 0x10, SectionFlags::READ));
        image
            .relocations
            .push(RelocationBlock::new(0x1000).with_entry(0x4, RelocationEntry::HIGHLOW));

        let err = run_relocatable(&dry_config(Machine::Amd64), &image).unwrap_err();
        assert!(matches!(err, RunnerError::Load(LoadError::ArchitectureMismatch { .. })));
        assert_eq!(err.exit_code(), 2);

        let err = run_fixed(&dry_config(Machine::Arm64), &image, || None).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        // same image, matching simulated machine
        assert!(run_relocatable(&dry_config(Machine::I386), &image).is_ok());
    }

    #[test]
    fn test_dry_run_defaults_to_build_target() {
        let config = RunnerConfig::from_lookup("calc.exe", |key| (key == "PEFRM_DRY_RUN").then(|| "1".to_string()));
        assert_eq!(config.dry_run_machine, pefrm_loader::HOST_MACHINE);

        // no build target loads this one
        let mut image = ImageDescription::new(Machine::Unknown(0x1c0), 0x40_0000, 0x2000);
        image.dynamic_base = true;
        let err = run_relocatable(&config, &image).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
