//! Verify tile decoding of the canonical quad-tile test image
//!
//! Usage: tilecheck [PROJECT_ROOT]
//!
//! The image is read from `<root>/test/images/quad-tile.jpg.tiff`. Without an
//! argument the root is the part of the working directory before its `build`
//! directory. Set `RUST_LOG=debug` to see each step.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use log::error;

fn project_root() -> PathBuf {
    if let Some(root) = env::args_os().nth(1) {
        return PathBuf::from(root);
    }
    let cwd = match env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            error!("cannot read the current directory: {e}");
            PathBuf::from(".")
        }
    };
    match tilecheck::project_root_from(&cwd) {
        Some(root) => root,
        None => {
            error!(
                "Working directory {} is not inside a build dir. Run from the build dir or \
                 pass the project dir as a parameter: tilecheck /absolute/path/to/project/dir. \
                 Falling back to the working directory as root dir.",
                cwd.display()
            );
            cwd
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let image = tilecheck::image_path_in(&project_root());
    match tilecheck::verify(&image) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("verification of {} failed with error:\n{e}", image.display());
            ExitCode::FAILURE
        }
    }
}
