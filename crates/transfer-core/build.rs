fn main() {
    println!("cargo:rerun-if-changed=proto/transfer.proto");

    if let Ok(protoc) = protoc_bin_vendored::protoc_bin_path() {
        unsafe {
            std::env::set_var("PROTOC", protoc);
        }
    }
    if let Err(err) = prost_build::compile_protos(&["proto/transfer.proto"], &["proto"]) {
        panic!("prost build failed: {err}");
    }
}
