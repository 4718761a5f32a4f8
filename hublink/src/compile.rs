//! Script compilation to MPY bytecode.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// MPY ABI version the hubs load.
pub const MPY_ABI: u32 = 5;

/// Directory inline scripts are saved to.
pub const BUILD_DIR: &str = "build";

/// File name an inline script is saved as.
const INLINE_SCRIPT: &str = "_tmp.py";

/// Turns MicroPython source into an MPY blob.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compiles `source` for MPY ABI `abi`.
    async fn compile(&self, source: &str, abi: u32) -> Result<Vec<u8>>;
}

/// [`Compiler`] that runs the `mpy-cross` executable.
#[derive(Debug, Clone)]
pub struct MpyCross {
    /// Executable to run.
    program: PathBuf,
    /// Extra arguments passed before the source file.
    args: Vec<String>,
}

impl Default for MpyCross {
    fn default() -> Self {
        Self::new("mpy-cross")
    }
}

impl MpyCross {
    /// Uses the given `mpy-cross` executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Adds an argument for every compile.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[async_trait]
impl Compiler for MpyCross {
    async fn compile(&self, source: &str, abi: u32) -> Result<Vec<u8>> {
        if abi != MPY_ABI {
            return Err(Error::UnsupportedAbi(abi));
        }

        let dir = tempfile::tempdir()?;
        let src = dir.path().join("main.py");
        let out = dir.path().join("main.mpy");
        tokio::fs::write(&src, source).await?;

        debug!(program = %self.program.display(), "running mpy-cross");
        let output = Command::new(&self.program)
            .arg("-mno-unicode")
            .args(&self.args)
            .arg("-o")
            .arg(&out)
            .arg(&src)
            .current_dir(dir.path())
            .output()
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::Compile {
                    diagnostics: format!("{} not found", self.program.display()),
                },
                _ => Error::Io(e),
            })?;

        if !output.status.success() {
            return Err(Error::Compile {
                diagnostics: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let mpy = tokio::fs::read(&out).await?;
        check_header(&mpy, abi)?;
        debug!(size = mpy.len(), "compiled");
        Ok(mpy)
    }
}

/// Verifies the MPY magic byte and ABI version.
fn check_header(mpy: &[u8], abi: u32) -> Result<()> {
    match mpy {
        [b'M', version, ..] if u32::from(*version) == abi => Ok(()),
        [b'M', version, ..] => Err(Error::Compile {
            diagnostics: format!("compiler produced MPY version {version}, expected {abi}"),
        }),
        _ => Err(Error::Compile {
            diagnostics: "compiler output is not an MPY file".into(),
        }),
    }
}

/// Saves an inline script as `<build_dir>/_tmp.py` and returns its path.
pub fn save_script(source: &str, build_dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(build_dir)?;
    let path = build_dir.join(INLINE_SCRIPT);
    std::fs::write(&path, format!("{source}\n"))?;
    Ok(path)
}

/// Resolves a command-line script argument.
///
/// An existing path is used as is; anything else is treated as inline
/// source and saved under [`BUILD_DIR`].
pub fn script_source(arg: &str) -> io::Result<PathBuf> {
    let path = Path::new(arg);
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    save_script(arg, Path::new(BUILD_DIR))
}
