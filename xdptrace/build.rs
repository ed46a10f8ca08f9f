use std::{env, path::Path};

use libbpf_cargo::SkeletonBuilder;

// eBPF objects sources MUST be suffixed with .bpf.c, the resulting object is
// written in OUT_DIR under the same base name with a .bpf.o suffix.
fn build_object(source: &str) {
    let (_, file) = source.rsplit_once('/').unwrap();
    let (name, _) = file.split_once('.').unwrap();

    let out = env::var("OUT_DIR").unwrap();
    let obj = Path::new(&out).join(format!("{name}.bpf.o"));

    if let Err(e) = SkeletonBuilder::new()
        .source(source)
        .obj(&obj)
        .clang_args(["-Wall", "-Wno-unused-function"])
        .build()
    {
        panic!("Unable to build {source}: {e:?}");
    }

    println!("cargo:rerun-if-changed={source}");
}

fn main() {
    build_object("src/bpf/xdp.bpf.c");
}
