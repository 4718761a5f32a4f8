//! `hublink compile`: compile a script and dump the MPY blob.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use hublink::{Compiler, MPY_ABI, MpyCross};

use crate::OutputFormat;

/// Bytes per line of the C array dump.
const WIDTH: usize = 8;

/// Arguments for `hublink compile`.
#[derive(clap::Args)]
pub struct CompileArgs {
    /// Script path, or inline MicroPython source.
    script: String,

    /// Output format.
    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,

    /// mpy-cross executable.
    #[arg(long, default_value = "mpy-cross")]
    mpy_cross: PathBuf,
}

impl CompileArgs {
    pub async fn run(self) -> Result<()> {
        let path = hublink::script_source(&self.script).context("failed to save inline script")?;
        let source = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mpy = MpyCross::new(self.mpy_cross)
            .compile(&source, MPY_ABI)
            .await
            .with_context(|| format!("failed to compile {}", path.display()))?;

        match self.format {
            OutputFormat::CArray => print!("{}", c_array(&mpy)),
            OutputFormat::Json => {
                let obj = serde_json::json!({
                    "script": path,
                    "version": mpy.get(1),
                    "size": mpy.len(),
                    "mpy": mpy,
                });
                println!("{}", serde_json::to_string_pretty(&obj)?);
            }
        }
        Ok(())
    }
}

/// Formats an MPY blob as a C byte array.
fn c_array(mpy: &[u8]) -> String {
    let version = mpy.get(1).copied().unwrap_or_default();
    let mut out = format!(
        "// MPY file. Version: {version}. Size: {} bytes\nconst uint8_t script[] = {{\n",
        mpy.len()
    );
    for row in mpy.chunks(WIDTH) {
        let hex: Vec<String> = row.iter().map(|b| format!("0x{b:02X}")).collect();
        let _ = writeln!(out, "    {},", hex.join(", "));
    }
    out.push_str("};\n");
    out
}
