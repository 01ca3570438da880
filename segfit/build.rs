use std::env::{self, VarError};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const DEFAULT_MAX_HEAP_BYTES: u32 = 20 * (1 << 20);
const SEGFIT_MAX_HEAP_BYTES: &'static str = "SEGFIT_MAX_HEAP_BYTES";

fn main() {
    create_max_heap_bytes_file();
    export_rerun_rules();
}

fn create_max_heap_bytes_file() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR environment variable not provided");
    let dest_path = Path::new(&out_dir).join("segfit_max_heap_bytes.txt");
    let size: u32 = match env::var(SEGFIT_MAX_HEAP_BYTES) {
        Ok(s) => s
            .parse()
            .expect("Could not interpret SEGFIT_MAX_HEAP_BYTES as a 32 bit unsigned integer"),
        Err(VarError::NotPresent) => DEFAULT_MAX_HEAP_BYTES,
        Err(VarError::NotUnicode(_)) => panic!(
            "Could not interpret SEGFIT_MAX_HEAP_BYTES as a string representing a 32 bit unsigned integer"
        ),
    };
    let mut f = File::create(&dest_path)
        .expect("Could not create file to store segfit max heap size metadata.");
    write!(f, "{}", size).expect("Could not write to segfit max heap size metadata file");
    f.flush()
        .expect("Could not flush write to segfit max heap size metadata file");
}

fn export_rerun_rules() {
    println!("cargo:rerun-if-env-changed={}", SEGFIT_MAX_HEAP_BYTES);
    println!("cargo:rerun-if-changed=./Cargo.toml");
    println!("cargo:rerun-if-changed=./build.rs");

    let manifest_dir =
        env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR environment variable not provided");
    let src = Path::new(&manifest_dir).join("src");
    let sources = globwalk::GlobWalkerBuilder::from_patterns(&src, &["**/*.rs"])
        .build()
        .expect("Could not walk the segfit source tree");
    for entry in sources.filter_map(Result::ok) {
        println!("cargo:rerun-if-changed={}", entry.path().display());
    }
}
