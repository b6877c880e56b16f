//! Build Script for Sample Service
//!
//! Compiles the workspace proto definitions into Rust stubs and writes the
//! encoded file descriptor set used by the gRPC reflection service.
//!
//! # Panics Policy
//!
//! Build scripts halt the build on failure; there is no caller to propagate
//! errors to, so `.expect()` with a descriptive message is used throughout.
#![allow(clippy::expect_used)]

use prost::Message;
use std::{env, fs, path::PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../packages/proto/sample/");
    println!("cargo:rerun-if-env-changed=SAMPLE_SERVICE_COMMIT");
    println!("cargo:rerun-if-env-changed=SAMPLE_SERVICE_BUILD_DATE");

    // Emit cfg for coverage detection
    if env::var("CARGO_LLVM_COV").is_ok()
        || env::var("LLVM_PROFILE_FILE").is_ok()
        || env::var("RUSTFLAGS")
            .map(|f| f.contains("instrument-coverage"))
            .unwrap_or(false)
    {
        println!("cargo:rustc-cfg=coverage");
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let proto_root = manifest_dir.join("../../packages/proto");
    let proto_files = [proto_root.join("sample/info/v1/info.proto")];

    for proto in &proto_files {
        println!("cargo:rerun-if-changed={}", proto.display());
    }

    // protox parses the protos in-process, so no protoc is needed in PATH.
    let fds = protox::compile(&proto_files, [&proto_root])
        .expect("Failed to parse proto definitions");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    fs::write(out_dir.join("sample_descriptor.bin"), fds.encode_to_vec())
        .expect("Failed to write descriptor set");

    tonic_prost_build::configure()
        .build_client(true) // The gateway dials the gRPC server as a client
        .build_server(true)
        .message_attribute(
            ".sample",
            "#[derive(serde::Serialize, serde::Deserialize)] #[serde(default)]",
        )
        .compile_fds(fds)
        .expect("Failed to compile protobuf definitions");
}
