use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    // Clients for both services; servers are only used by in-process test fixtures
    let config = tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .out_dir(&out_dir);

    config.compile_protos(&["proto/podresources.proto", "proto/rdc.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/podresources.proto");
    println!("cargo:rerun-if-changed=proto/rdc.proto");

    Ok(())
}
