use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/c_api/");
    println!("cargo:rerun-if-changed=cbindgen.toml");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=JSON_EVAL_SKIP_HEADER");

    // Read-only source trees (docs.rs, vendored builds) cannot take the header
    if env::var_os("JSON_EVAL_SKIP_HEADER").is_some() || env::var_os("DOCS_RS").is_some() {
        return;
    }

    let crate_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    let include_dir = crate_dir.join("include").join("json_eval");
    std::fs::create_dir_all(&include_dir).expect("Failed to create include directory");

    let config = cbindgen::Config::from_file(crate_dir.join("cbindgen.toml"))
        .expect("Unable to read cbindgen.toml");

    let header_path = include_dir.join("json_eval.h");
    cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
        .expect("Unable to generate C bindings")
        .write_to_file(&header_path);
}
