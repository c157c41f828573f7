//! In-process stand-in for the data store's control tools.
//!
//! `nodetool snapshot` hard-links live table files into
//! `{table}/snapshots/{tag}`, `nodetool clearsnapshot` removes those
//! directories, `sstableloader` copies a staged table back into the data
//! directory, `pgrep` reports the configured liveness and `chown` is a no-op.
//! `tar` runs for real.

use std::cell::{Cell, RefCell};
use std::fs;
use std::io;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use snapstage::{ProcessToolRunner, ToolCommand, ToolError, ToolIo, ToolOutput, ToolRunner};

/// Suffix given to tables recreated by the simulated bulk loader.
pub const LOADED_TABLE_SUFFIX: &str = "0f1e2d3c";

#[derive(Clone, Debug)]
pub struct StoreSimulator {
    data_dir: Utf8PathBuf,
    running: Rc<Cell<bool>>,
    commands: Rc<RefCell<Vec<String>>>,
}

impl StoreSimulator {
    pub fn new(data_dir: &Utf8Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            running: Rc::new(Cell::new(false)),
            commands: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.set(running);
    }

    /// Program names of every command run so far, in order.
    pub fn programs(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }

    fn simulate(&self, command: &ToolCommand) -> io::Result<i32> {
        let args = command.arguments();
        match (command.program_name(), args.first().map(String::as_str)) {
            ("nodetool", Some("snapshot")) => {
                let tag = flag_value(args, "-t")?;
                let keyspaces: Vec<&str> = args.iter().skip(3).map(String::as_str).collect();
                self.snapshot(tag, &keyspaces)?;
                Ok(0)
            }
            ("nodetool", Some("clearsnapshot")) => {
                self.clear_snapshot(flag_value(args, "-t")?)?;
                Ok(0)
            }
            ("sstableloader", _) => {
                let table_dir = args
                    .last()
                    .map(Utf8PathBuf::from)
                    .ok_or_else(|| invalid("sstableloader needs a table directory"))?;
                self.bulk_load(&table_dir)?;
                Ok(0)
            }
            ("pgrep", _) => Ok(if self.running.get() { 0 } else { 1 }),
            ("chown", _) => Ok(0),
            (other, _) => Err(invalid(&format!("unexpected tool {other}"))),
        }
    }

    fn snapshot(&self, tag: &str, keyspaces: &[&str]) -> io::Result<()> {
        for keyspace in list_dirs(&self.data_dir)? {
            if !keyspaces.is_empty() && !keyspaces.contains(&keyspace.as_str()) {
                continue;
            }
            let keyspace_dir = self.data_dir.join(&keyspace);
            for table in list_dirs(&keyspace_dir)? {
                let table_dir = keyspace_dir.join(&table);
                let snapshot_dir = table_dir.join("snapshots").join(tag);
                fs::create_dir_all(&snapshot_dir)?;
                for entry in fs::read_dir(&table_dir)? {
                    let entry = entry?;
                    if entry.file_type()?.is_file() {
                        fs::hard_link(entry.path(), snapshot_dir.join(entry.file_name().to_string_lossy().as_ref()))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn clear_snapshot(&self, tag: &str) -> io::Result<()> {
        for keyspace in list_dirs(&self.data_dir)? {
            let keyspace_dir = self.data_dir.join(&keyspace);
            for table in list_dirs(&keyspace_dir)? {
                let snapshot_dir = keyspace_dir.join(&table).join("snapshots").join(tag);
                if snapshot_dir.exists() {
                    fs::remove_dir_all(&snapshot_dir)?;
                }
            }
        }
        Ok(())
    }

    fn bulk_load(&self, table_dir: &Utf8Path) -> io::Result<()> {
        let (Some(table), Some(keyspace)) = (
            table_dir.file_name(),
            table_dir.parent().and_then(Utf8Path::file_name),
        ) else {
            return Err(invalid("table directory must be {keyspace}/{table}"));
        };
        let target = self
            .data_dir
            .join(keyspace)
            .join(format!("{table}-{LOADED_TABLE_SUFFIX}"));
        fs::create_dir_all(&target)?;
        for entry in fs::read_dir(table_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::copy(entry.path(), target.join(entry.file_name().to_string_lossy().as_ref()))?;
            }
        }
        Ok(())
    }
}

impl ToolRunner for StoreSimulator {
    fn run(&self, command: &ToolCommand, io: &ToolIo) -> Result<ToolOutput, ToolError> {
        self.commands
            .borrow_mut()
            .push(command.program_name().to_owned());
        if command.program_name() == "tar" {
            return ProcessToolRunner.run(command, io);
        }
        let code = self.simulate(command).map_err(|err| ToolError::Launch {
            program: command.program().to_owned(),
            message: err.to_string(),
        })?;
        Ok(ToolOutput {
            code: Some(code),
            stdout: String::new(),
        })
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> io::Result<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|index| args.get(index + 1))
        .map(String::as_str)
        .ok_or_else(|| invalid(&format!("missing {flag}")))
}

fn list_dirs(path: &Utf8Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.to_owned())
}
