fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(false)
        .compile_protos(&["proto/anvil/v1/workflow.proto"], &["proto"])?;
    Ok(())
}
