use std::env;
use std::process::Command;

// Embed rpaths so the installed binary can locate libpython without
// LD_LIBRARY_PATH, whether it runs from a packaged layout or a dev tree.
fn main() {
    println!("cargo:rerun-if-env-changed=PYO3_PYTHON");

    let Ok(target) = env::var("TARGET") else {
        return;
    };

    let rpaths: &[&str] = if target.contains("apple-darwin") {
        &[
            "@executable_path",
            "@executable_path/../lib",
            "/opt/homebrew/lib",
            "/usr/local/lib",
            "/Library/Frameworks/Python.framework/Versions/Current/lib",
        ]
    } else if target.contains("linux") {
        &[
            "$ORIGIN",
            "$ORIGIN/../lib",
            "/usr/lib",
            "/usr/lib64",
            "/usr/local/lib",
        ]
    } else {
        &[]
    };

    if rpaths.is_empty() {
        return;
    }

    for path in rpaths {
        add_rpath(path);
    }

    // Build-time Python LIBDIR (useful for local dev, harmless in release)
    if let Some(libdir) = python_libdir() {
        add_rpath(&libdir);
    }
}

fn add_rpath(path: &str) {
    println!("cargo:rustc-link-arg=-Wl,-rpath,{path}");
}

/// Ask the build-time Python interpreter where libpython lives.
fn python_libdir() -> Option<String> {
    let python = env::var("PYO3_PYTHON").ok()?;
    let output = Command::new(&python)
        .args([
            "-c",
            "import sysconfig; print(sysconfig.get_config_var('LIBDIR'))",
        ])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let libdir = String::from_utf8(output.stdout).ok()?;
    let libdir = libdir.trim();
    if libdir.is_empty() {
        return None;
    }
    Some(libdir.to_string())
}
