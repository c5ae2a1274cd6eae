fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Rebuild triggers
    println!("cargo:rerun-if-changed=proto/discovery.proto");

    // Fall back to a vendored protoc binary when one isn't already on PATH or
    // pointed at by $PROTOC. Keeps the protobuf codegen building in hermetic
    // environments without a system protoc install.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    // Compile discovery protobuf files. The wire messages double as the
    // HTTP gateway's JSON surface, so they carry serde derives; field-level
    // defaults keep partially-populated JSON requests decodable.
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .type_attribute(
            ".xds.discovery.v1",
            "#[derive(serde::Serialize, serde::Deserialize)]",
        )
        .field_attribute(".xds.discovery.v1", "#[serde(default)]")
        .compile_protos(&["proto/discovery.proto"], &["proto"])?;

    Ok(())
}
