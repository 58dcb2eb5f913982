use std::env;

fn main() {
    let version = env::var("VISION_DEMO_VERSION")
        .or_else(|_| env::var("CARGO_PKG_VERSION"))
        .unwrap_or_else(|_| "dev".to_string());
    println!("cargo:rerun-if-env-changed=VISION_DEMO_VERSION");
    println!("cargo:rustc-env=VISION_DEMO_VERSION={version}");
}
