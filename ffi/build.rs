use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src");
    let crate_dir =
        PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string()));
    let Ok(out_dir) = env::var("OUT_DIR") else {
        return;
    };
    // Parse the sources directly; `with_crate` would shell out to cargo.
    match cbindgen::Builder::new()
        .with_src(crate_dir.join("src/lib.rs"))
        .with_src(crate_dir.join("src/types.rs"))
        .with_language(cbindgen::Language::C)
        .with_include_guard("COURIER_H")
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(PathBuf::from(out_dir).join("courier.h"));
        }
        Err(e) => println!("cargo:warning=C header not generated: {e}"),
    }
}
