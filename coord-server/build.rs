fn main() {
    println!("cargo:rerun-if-changed=proto/coordinator.proto");
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile_protos(&["proto/coordinator.proto"], &["proto"])
        .expect("failed to compile coordinator.proto");
}
