//! This is the main entry point for the volume browser.
//!
//! The program provides an interactive command-line interface for browsing FAT32
//! and NTFS volumes. Users can open a device or disk image, move through its
//! folders, print files and layouts, and quit the program using commands.
//!
//! Each `-v` flag on the command line raises the log verbosity by one level.

use clap::Parser;
use log::{error, warn};
use std::{
    fs::File,
    io::{self, Write},
    path::Path,
};
use volume_forensics::commands::{Command, HELP};
use volume_forensics::filesystem::Volume;
use volume_forensics::traits::{LayoutDisplay, TreeDisplay};
use volume_forensics::utils::hex_dump;
use volume_forensics::{Entry, VolumeHandle};

#[derive(Parser)]
#[command(name = "volume_forensics")]
#[command(about = "Interactive browser for FAT32 and NTFS volume images", long_about = None)]
struct Cli {
    /// Raise log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Represents the runtime state of the program.
struct RunState {
    /// The currently mounted volume.
    volume: Option<VolumeHandle<File>>,
    /// Folders from the root down to the current one.
    cwd: Vec<Entry>,
    /// Enable the validation of the boot sector
    bpb_validation: bool,
}

impl RunState {
    /// Returns the mounted volume and the current folder.
    fn current(&mut self) -> Option<(&mut VolumeHandle<File>, Entry)> {
        let folder = self.cwd.last()?.clone();
        self.volume.as_mut().map(|vol| (vol, folder))
    }

    /// Renders the current folder as a path.
    fn prompt(&self) -> String {
        if self.volume.is_none() {
            return String::new();
        }
        let names: Vec<&str> = self.cwd.iter().skip(1).map(|e| e.name().as_str()).collect();
        format!("/{}", names.join("/"))
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = stderrlog::new()
        .module(module_path!())
        .module("volume_forensics")
        .verbosity(usize::from(cli.verbose))
        .init()
    {
        eprintln!("Logger initialisation failed: {err}");
    }

    let mut run_state = RunState {
        volume: None,
        cwd: vec![],
        bpb_validation: true,
    };

    loop {
        print!("{}> ", run_state.prompt());
        if let Err(err) = io::stdout().flush() {
            error!("{err}");
        }

        let mut s = String::new();
        match io::stdin().read_line(&mut s) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                error!("Failed to read command: {err}");
                break;
            }
        }

        match Command::from_string(&s) {
            Command::Open(path) => {
                match VolumeHandle::mount(Path::new(&path), run_state.bpb_validation) {
                    Ok(handle) => {
                        println!("Mounted {} volume", handle.kind());
                        run_state.cwd = vec![handle.root().clone()];
                        run_state.volume = Some(handle);
                    }
                    Err(err) => {
                        error!("{err}");
                    }
                }
            }
            Command::Quit => break,
            Command::List => list(&mut run_state),
            Command::ChangeDir(name) => change_dir(&mut run_state, &name),
            Command::Cat(name) => cat(&mut run_state, &name),
            Command::Info => match &run_state.volume {
                Some(handle) => match handle.volume_info() {
                    Ok(info) => match info.display_layout(3) {
                        Ok(s) => print!("{s}"),
                        Err(e) => error!("Print info error: {e}"),
                    },
                    Err(err) => error!("{err}"),
                },
                None => warn!("Open a volume first"),
            },
            Command::Bpb => match run_state.volume.as_ref().map(VolumeHandle::volume) {
                Some(Volume::Fat32(vol)) => print!("{}", vol.boot_sector()),
                Some(Volume::Ntfs(vol)) => print!("{}", vol.boot_sector()),
                None => warn!("Open a volume first"),
            },
            Command::Layout => match &run_state.volume {
                Some(handle) => match handle.display_layout(3) {
                    Ok(s) => print!("{s}"),
                    Err(e) => error!("Print layout error: {e}"),
                },
                None => warn!("Open a volume first"),
            },
            Command::Tree => {
                if let Some(handle) = run_state.volume.as_mut() {
                    match handle.display_tree() {
                        Ok(tree) => print!("{tree}"),
                        Err(err) => error!("Tree printing failed: {err}"),
                    }
                } else {
                    warn!("Open a volume first")
                }
            }
            Command::Skip => run_state.bpb_validation = false,
            Command::Help => println!("{HELP}"),
            Command::Unknown(s) => error!("Unknown command: {s:?}"),
            Command::Invalid(s) => error!("{s}"),
            Command::Empty => {}
        }
    }
}

fn list(run_state: &mut RunState) {
    let Some((handle, folder)) = run_state.current() else {
        warn!("Open a volume first");
        return;
    };

    match handle.list_directory(&folder) {
        Ok(entries) => {
            for entry in entries {
                println!("{entry}");
            }
        }
        Err(err) => error!("{err}"),
    }
}

fn change_dir(run_state: &mut RunState, name: &str) {
    match name {
        "." => return,
        ".." => {
            if run_state.cwd.len() > 1 {
                run_state.cwd.pop();
            }
            return;
        }
        _ => {}
    }

    let Some((handle, folder)) = run_state.current() else {
        warn!("Open a volume first");
        return;
    };

    match handle.open_path(&folder, name) {
        Ok(entry) if entry.is_dir() => run_state.cwd.push(entry),
        Ok(entry) => error!("`{}` is not a directory", entry.name()),
        Err(err) => error!("{err}"),
    }
}

fn cat(run_state: &mut RunState, name: &str) {
    let Some((handle, folder)) = run_state.current() else {
        warn!("Open a volume first");
        return;
    };

    let entry = match handle.open_path(&folder, name) {
        Ok(entry) => entry,
        Err(err) => {
            error!("{err}");
            return;
        }
    };

    match handle.read_file_content(&entry) {
        Ok(content) if entry.is_text() => println!("{}", String::from_utf8_lossy(&content)),
        Ok(content) => print!("{}", hex_dump(&content)),
        Err(err) => error!("{err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_repeated_verbose_flags() {
        assert_eq!(Cli::try_parse_from(["main"]).unwrap().verbose, 0);
        assert_eq!(Cli::try_parse_from(["main", "-vv"]).unwrap().verbose, 2);
        assert_eq!(Cli::try_parse_from(["main", "-v", "--verbose"]).unwrap().verbose, 2);
    }

    #[test]
    fn rejects_unknown_arguments() {
        assert!(Cli::try_parse_from(["main", "--bogus"]).is_err());
    }
}
