/// Builds the gRPC client and server code for the `todo.proto` definition using
/// `tonic-prost-build`.
///
/// The well-known types (`Timestamp`, `FieldMask`) resolve to `prost-types`,
/// and the `protoc` binary plus its include directory come from
/// `protoc-bin-vendored` so no system installation is required.
///
/// # Files and Paths
///
/// - Proto file: `proto/todo.proto`
/// - Includes: `proto/` and the vendored `google/protobuf` includes
/// - Descriptor set: `$OUT_DIR/todo_descriptor.bin` (served by reflection)
///
/// # Output
///
/// ```rust,ignore
/// pub mod proto {
///     tonic::include_proto!("todo");
/// }
/// ```
use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    // SAFETY: build scripts are single threaded at this point.
    unsafe {
        env::set_var("PROTOC", protoc);
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("todo_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    let includes = [PathBuf::from("proto"), protoc_bin_vendored::include_path()?];
    tonic_prost_build::configure().compile_with_config(
        config,
        &[PathBuf::from("proto/todo.proto")],
        &includes,
    )?;

    println!("cargo:rerun-if-changed=proto/todo.proto");
    Ok(())
}
