//! This module defines the `Command` enum and its associated methods for parsing
//! and handling user commands in the volume browser.
//!
//! The `Command` enum represents the commands the user can input, such as
//! opening a volume, moving through its folders, reading a file or quitting,
//! as well as invalid or unknown input.

/// Represents a user command in the volume browser.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// Command to quit the program.
    Quit,
    /// Command to mount a device or disk image, encapsulating its path.
    Open(String),
    /// List the current folder.
    List,
    /// Change the current folder; `.` and `..` are understood.
    ChangeDir(String),
    /// Print a file of the current folder.
    Cat(String),
    /// Print the boot sector summary.
    Info,
    /// Print the full boot sector, field by field.
    Bpb,
    /// Print the on-disk layout of the volume.
    Layout,
    /// Print the directory tree of the volume.
    Tree,
    /// Skip the boot sector validation on the next open.
    Skip,
    /// Print the list of commands.
    Help,
    /// Command for an unknown input, encapsulating the raw input as a `String`.
    Unknown(String),
    /// Command for invalid input, encapsulating an error message as a `String`.
    Invalid(String),
    /// Command for an empty input.
    Empty,
}

/// Help text printed by the `help` command.
pub const HELP: &str = "\
Commands:
  open <path>           mount a FAT32 or NTFS device or disk image
  ls | dir              list the current folder
  cd <name>             enter a folder (`.` and `..` supported)
  cat | open-file <name> print a file (text for .txt files, hex otherwise)
  info                  print the boot sector summary
  bpb                   print every boot sector field
  layout                print the volume layout
  tree                  print the directory tree
  skip                  skip boot sector validation on the next open
  help                  print this help
  quit | exit           leave";

impl Command {
    /// Parses a string into a `Command` instance.
    ///
    /// # Parameters
    /// - `s`: A string slice representing the user input.
    ///
    /// # Returns
    /// - The matching command. Commands taking a name (`cd`, `cat`) keep the
    ///   rest of the line so that names may contain spaces.
    /// - `Command::Unknown` if the input does not match any known command.
    /// - `Command::Invalid` if an argument is missing.
    /// - `Command::Empty` if the input is empty or contains only whitespace.
    pub fn from_string(s: &str) -> Self {
        let line = s.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        let with_arg = |make: fn(String) -> Command, msg: &str| {
            if rest.is_empty() {
                Command::Invalid(msg.to_string())
            } else {
                make(rest.to_string())
            }
        };

        match head {
            "quit" | "exit" => Command::Quit,
            "open" => with_arg(
                Command::Open,
                "Missing arg: 'open' expects the path to a device or disk image.",
            ),
            "ls" | "dir" => Command::List,
            "cd" => with_arg(
                Command::ChangeDir,
                "Missing arg: 'cd' expects a folder name.",
            ),
            "cat" | "open-file" => with_arg(
                Command::Cat,
                "Missing arg: 'cat' expects a file name.",
            ),
            "info" => Command::Info,
            "bpb" => Command::Bpb,
            "layout" => Command::Layout,
            "tree" => Command::Tree,
            "skip" => Command::Skip,
            "help" => Command::Help,
            "" => Command::Empty,
            other => Command::Unknown(other.to_string()),
        }
    }
}
