//! Launcher failures and their exit codes.

use core::fmt;
use std::io;
use std::path::PathBuf;

use pefrm_image::ImageError;
use pefrm_loader::LoadError;

/// Launcher result type
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Anything that stops a launch
#[derive(Debug)]
pub enum RunnerError {
    /// The image file could not be read
    ImageUnreadable {
        /// Path that was tried
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },
    /// The file is not a usable PE image
    Decode(ImageError),
    /// The loader refused or failed
    Load(LoadError),
    /// No native host exists for this platform
    UnsupportedHost,
    /// The process-wide native host was already taken
    HostInUse,
}

impl RunnerError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ImageUnreadable { .. } => 1,
            Self::Load(err) => err.exit_code(),
            Self::Decode(_) => 14,
            Self::UnsupportedHost => 15,
            Self::HostInUse => 16,
        }
    }
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageUnreadable { path, source } => {
                write!(f, "Cannot read {}: {}", path.display(), source)
            },
            Self::Decode(err) => write!(f, "Cannot decode image: {}", err),
            Self::Load(err) => write!(f, "{}", err),
            Self::UnsupportedHost => write!(f, "Native loading is only available on Windows; use PEFRM_DRY_RUN=1"),
            Self::HostInUse => write!(f, "Native host already acquired by this process"),
        }
    }
}

impl std::error::Error for RunnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ImageUnreadable { source, .. } => Some(source),
            Self::Decode(err) => Some(err),
            Self::Load(err) => Some(err),
            Self::UnsupportedHost | Self::HostInUse => None,
        }
    }
}

impl From<ImageError> for RunnerError {
    fn from(err: ImageError) -> Self {
        Self::Decode(err)
    }
}

impl From<LoadError> for RunnerError {
    fn from(err: LoadError) -> Self {
        Self::Load(err)
    }
}
