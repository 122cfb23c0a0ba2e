//! Shared fixtures: synthetic repositories with hand-built pack and index files
#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use gix_object::Kind;
use sha1::{Digest, Sha1};
use tempfile::TempDir;

use git_serve_pack::pack::{EntryKind, ObjectHeader, ObjectId};
use git_serve_pack::ServerConfig;

pub const TIP: &str = "abc1230000000000000000000000000000000def";

/// An object to place in a fixture pack
pub struct FixtureObject {
    pub kind: EntryKind,
    pub data: Vec<u8>,
}

impl FixtureObject {
    pub fn blob(data: &[u8]) -> Self {
        Self {
            kind: EntryKind::Base(Kind::Blob),
            data: data.to_vec(),
        }
    }

    pub fn commit(data: &[u8]) -> Self {
        Self {
            kind: EntryKind::Base(Kind::Commit),
            data: data.to_vec(),
        }
    }

    pub fn ofs_delta(base_distance: u64, delta: &[u8]) -> Self {
        Self {
            kind: EntryKind::OfsDelta { base_distance },
            data: delta.to_vec(),
        }
    }

    pub fn ref_delta(base_id: ObjectId, delta: &[u8]) -> Self {
        Self {
            kind: EntryKind::RefDelta { base_id },
            data: delta.to_vec(),
        }
    }

    /// Loose-object id for base objects; deltas get a digest of their bytes
    pub fn id(&self) -> ObjectId {
        let mut hasher = Sha1::new();
        if let EntryKind::Base(kind) = self.kind {
            let name = match kind {
                Kind::Commit => "commit",
                Kind::Tree => "tree",
                Kind::Blob => "blob",
                Kind::Tag => "tag",
            };
            hasher.update(format!("{} {}\0", name, self.data.len()).as_bytes());
        } else {
            hasher.update(b"delta\0");
        }
        hasher.update(&self.data);
        ObjectId(hasher.finalize().into())
    }

    /// Header plus zlib-compressed body, as stored in a pack
    pub fn entry_bytes(&self) -> Vec<u8> {
        let mut bytes = ObjectHeader {
            kind: self.kind,
            size: self.data.len() as u64,
        }
        .encode();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.data).unwrap();
        bytes.extend(encoder.finish().unwrap());
        bytes
    }
}

/// One entry as written to a fixture pack
pub struct WrittenEntry {
    pub id: ObjectId,
    pub offset: u64,
    pub bytes: Vec<u8>,
}

pub struct WrittenPack {
    pub pack_path: PathBuf,
    pub idx_path: PathBuf,
    pub bytes: Vec<u8>,
    pub entries: Vec<WrittenEntry>,
}

/// A `.git` directory in a temp dir with a ref and a pack directory
pub struct RepoFixture {
    pub temp: TempDir,
}

impl RepoFixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let fixture = Self { temp };
        fs::create_dir_all(fixture.git_dir().join("refs/heads")).unwrap();
        fs::create_dir_all(fixture.pack_dir()).unwrap();
        fixture.write_ref("main", TIP);
        fixture
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn git_dir(&self) -> PathBuf {
        self.temp.path().join(".git")
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.git_dir().join("objects/pack")
    }

    pub fn write_ref(&self, branch: &str, hex: &str) {
        let path = self.git_dir().join("refs/heads").join(branch);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("{}\n", hex)).unwrap();
    }

    pub fn remove_ref(&self, branch: &str) {
        fs::remove_file(self.git_dir().join("refs/heads").join(branch)).unwrap();
    }

    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            repo: self.root().to_path_buf(),
            ..ServerConfig::default()
        }
    }

    /// Write `pack-<name>.pack` and its index with entries packed back to back
    pub fn add_pack(&self, name: &str, objects: &[FixtureObject]) -> WrittenPack {
        self.add_pack_at(name, &objects.iter().map(|o| (None, o)).collect::<Vec<_>>())
    }

    /// Like `add_pack`, but entries with an offset are placed exactly there,
    /// zero-filling the gap before them
    pub fn add_pack_at(&self, name: &str, objects: &[(Option<u64>, &FixtureObject)]) -> WrittenPack {
        let mut bytes = b"PACK".to_vec();
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&(objects.len() as u32).to_be_bytes());

        let mut entries = Vec::new();
        for (offset, object) in objects {
            if let Some(offset) = offset {
                assert!(*offset as usize >= bytes.len(), "fixture offsets overlap");
                bytes.resize(*offset as usize, 0);
            }
            let entry = object.entry_bytes();
            entries.push(WrittenEntry {
                id: object.id(),
                offset: bytes.len() as u64,
                bytes: entry.clone(),
            });
            bytes.extend_from_slice(&entry);
        }
        let digest: [u8; 20] = Sha1::digest(&bytes).into();
        bytes.extend_from_slice(&digest);

        let pack_path = self.pack_dir().join(format!("pack-{}.pack", name));
        let idx_path = self.pack_dir().join(format!("pack-{}.idx", name));
        fs::write(&pack_path, &bytes).unwrap();
        fs::write(&idx_path, build_index(&entries, &digest)).unwrap();

        WrittenPack {
            pack_path,
            idx_path,
            bytes,
            entries,
        }
    }
}

/// Version 2 index for the given entries; CRCs are left zero
pub fn build_index(entries: &[WrittenEntry], pack_checksum: &[u8; 20]) -> Vec<u8> {
    let mut sorted: Vec<(ObjectId, u64)> = entries.iter().map(|e| (e.id, e.offset)).collect();
    sorted.sort();

    let mut data = vec![0xff, b't', b'O', b'c'];
    data.extend_from_slice(&2u32.to_be_bytes());
    for slot in 0..256usize {
        let cumulative = sorted
            .iter()
            .filter(|(id, _)| usize::from(id.0[0]) <= slot)
            .count() as u32;
        data.extend_from_slice(&cumulative.to_be_bytes());
    }
    for (id, _) in &sorted {
        data.extend_from_slice(id.as_bytes());
    }
    data.extend(std::iter::repeat(0u8).take(4 * sorted.len()));
    for (_, offset) in &sorted {
        data.extend_from_slice(&(*offset as u32).to_be_bytes());
    }
    data.extend_from_slice(pack_checksum);
    let digest: [u8; 20] = Sha1::digest(&data).into();
    data.extend_from_slice(&digest);
    data
}

/// A server response split into its parts
#[derive(Debug)]
pub struct Response {
    pub advertised: Vec<Vec<u8>>,
    pub nak: bool,
    pub pack: Vec<u8>,
}

/// Split raw output into advertisement lines, the NAK and the pack bytes
pub fn parse_response(output: &[u8]) -> Response {
    let mut pos = 0;
    let mut advertised = Vec::new();
    loop {
        let len = usize::from_str_radix(std::str::from_utf8(&output[pos..pos + 4]).unwrap(), 16)
            .unwrap();
        if len == 0 {
            pos += 4;
            break;
        }
        advertised.push(output[pos + 4..pos + len].to_vec());
        pos += len;
    }

    let nak = output.len() >= pos + 8 && &output[pos..pos + 8] == b"0008NAK\n";
    if nak {
        pos += 8;
    }
    Response {
        advertised,
        nak,
        pack: output[pos..].to_vec(),
    }
}

/// Check the pack framing and trailing checksum, returning the declared
/// count and the bytes between header and checksum
pub fn verify_pack(pack: &[u8]) -> (u32, Vec<u8>) {
    assert!(pack.len() >= 32, "pack too short: {} bytes", pack.len());
    assert_eq!(&pack[..4], b"PACK");
    assert_eq!(&pack[4..8], &2u32.to_be_bytes());
    let count = u32::from_be_bytes([pack[8], pack[9], pack[10], pack[11]]);

    let (body, checksum) = pack.split_at(pack.len() - 20);
    let digest: [u8; 20] = Sha1::digest(body).into();
    assert_eq!(checksum, &digest[..], "trailing checksum mismatch");
    (count, body[12..].to_vec())
}

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Helper to run git commands in a directory
pub fn git_command(dir: &Path, args: &[&str]) -> std::process::Output {
    let output = Command::new("git")
        .current_dir(dir)
        .args([
            "-c",
            "user.name=Test User",
            "-c",
            "user.email=test@example.com",
            "-c",
            "init.defaultBranch=main",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .output()
        .expect("Failed to run git command");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}
