use std::{
    env, fs,
    path::{Path, PathBuf},
};

fn main() {
    let bundled = env::var_os("CARGO_FEATURE_BUNDLED").is_some();
    let system = env::var_os("CARGO_FEATURE_SYSTEM").is_some();

    if bundled && system {
        panic!("ultra-engine-sys: enable only one of 'bundled' or 'system'");
    }

    if bundled {
        build_bundled();
    } else if system {
        link_system();
    }
    // Neither: link nothing; `ultra-engine` falls back to its stub.
}

fn link_system() {
    println!("cargo:rerun-if-env-changed=ULTRA_ENGINE_LIB_DIR");
    if let Some(dir) = env::var_os("ULTRA_ENGINE_LIB_DIR") {
        println!(
            "cargo:rustc-link-search=native={}",
            PathBuf::from(dir).display()
        );
    }

    println!("cargo:rustc-link-lib=ultraengine");
}

fn build_bundled() {
    let manifest_dir = PathBuf::from(env::var_os("CARGO_MANIFEST_DIR").unwrap());
    let src_dir = match env::var_os("ULTRA_ENGINE_SRC_DIR") {
        Some(src) => PathBuf::from(src),
        None => manifest_dir
            .join("..")
            .join("..")
            .join("vendor")
            .join("ultraengine"),
    };

    if !src_dir.join("ultra_engine.h").exists() {
        panic!(
            "ultra-engine-sys (bundled): {} is not an engine source tree (missing ultra_engine.h).\n\
Set ULTRA_ENGINE_SRC_DIR or place the sources at vendor/ultraengine.",
            src_dir.display()
        );
    }

    println!("cargo:rerun-if-changed={}", src_dir.display());
    println!("cargo:rerun-if-env-changed=ULTRA_ENGINE_SRC_DIR");

    let c_files = collect_c_files(&src_dir);
    if c_files.is_empty() {
        panic!(
            "ultra-engine-sys (bundled): found no C sources under {}",
            src_dir.display()
        );
    }

    let mut build = cc::Build::new();
    build.include(&src_dir);
    for file in c_files {
        build.file(file);
    }
    build.warnings(false);
    build.compile("ultraengine");

    if env::var_os("CARGO_CFG_UNIX").is_some() {
        println!("cargo:rustc-link-lib=m");
        println!("cargo:rustc-link-lib=pthread");
    }
}

fn collect_c_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                let name = path
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                if name.contains("test") || name.contains("tools") || name == ".git" {
                    continue;
                }
                stack.push(path);
            } else if file_type.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("c"))
            {
                out.push(path);
            }
        }
    }

    out.sort();
    out
}
