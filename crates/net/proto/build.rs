use std::error::Error;
use std::path::PathBuf;

use pb_rs::ConfigBuilder;
use pb_rs::types::FileDescriptor;
use walkdir::WalkDir;

fn main() -> Result<(), Box<dyn Error>> {
    let in_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR")?).join("proto");
    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?).join("proto");

    let mut protos = Vec::new();
    for entry in WalkDir::new(&in_dir) {
        let path = entry?.into_path();
        if path.extension().is_some_and(|ext| ext == "proto") {
            println!("cargo:rerun-if-changed={}", path.display());
            protos.push(path);
        }
    }

    if out_dir.exists() {
        std::fs::remove_dir_all(&out_dir)?;
    }
    std::fs::create_dir_all(&out_dir)?;

    let config = ConfigBuilder::new(&protos, None, Some(&out_dir), &[in_dir])
        .map_err(|e| format!("{e:?}"))?
        .dont_use_cow(true)
        .build();
    FileDescriptor::run(&config).map_err(|e| format!("{e:?}"))?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
