use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::descriptor::TaskDescriptor;

/// Append-only log of task descriptors for a single job.
///
/// Each record is a 4-byte big-endian length prefix followed by that
/// many bytes of the serialized descriptor. Root-task records are
/// flushed and fsynced; child-task records are appended without a
/// sync, piggybacking on whatever sync happens next.
pub struct Journal {
    path: PathBuf,
    file: Mutex<File>,
}

impl Journal {
    pub fn create(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("task_journal");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_root(&self, descriptor: &TaskDescriptor) -> io::Result<()> {
        self.append(descriptor, true)
    }

    pub fn append_child(&self, descriptor: &TaskDescriptor) -> io::Result<()> {
        self.append(descriptor, false)
    }

    fn append(&self, descriptor: &TaskDescriptor, sync: bool) -> io::Result<()> {
        let bytes = serde_json::to_vec(descriptor)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let len = u32::try_from(bytes.len())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = self.file.lock();
        file.write_all(&len.to_be_bytes())?;
        file.write_all(&bytes)?;
        file.flush()?;
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Reads every record from a journal file on disk, in append order.
    pub fn replay(path: &Path) -> io::Result<Vec<TaskDescriptor>> {
        let mut file = File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut descriptors = Vec::new();
        let mut offset = 0;
        while offset < buf.len() {
            if offset + 4 > buf.len() {
                break;
            }
            let len = u32::from_be_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
            offset += 4;
            if offset + len > buf.len() {
                break;
            }
            let record = &buf[offset..offset + len];
            offset += len;
            let descriptor: TaskDescriptor = serde_json::from_slice(record)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            descriptors.push(descriptor);
        }
        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TaskDescriptor;
    use tempfile::tempdir;

    fn descriptor(task_id: &str) -> TaskDescriptor {
        TaskDescriptor {
            task_id: task_id.to_string(),
            parent_task_id: None,
            handler: "noop".into(),
            inputs: Default::default(),
            expected_outputs: Some(vec![1]),
            num_outputs: None,
            continues_task: None,
            require_features: Vec::new(),
            save_continuation: false,
            select_group: None,
            select_timeout: None,
            replay_uuids: Vec::new(),
        }
    }

    #[test]
    fn replay_recovers_every_appended_record_in_order() {
        let dir = tempdir().unwrap();
        let journal = Journal::create(dir.path()).unwrap();

        journal.append_root(&descriptor("root:j0")).unwrap();
        journal.append_child(&descriptor("t1")).unwrap();
        journal.append_child(&descriptor("t2")).unwrap();

        let replayed = Journal::replay(journal.path()).unwrap();
        let ids: Vec<_> = replayed.iter().map(|d| d.task_id.clone()).collect();
        assert_eq!(ids, vec!["root:j0", "t1", "t2"]);
    }
}
