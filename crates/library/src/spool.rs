use bytes::Bytes;
use depot_storage::{Checksums, Content};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// Uploads larger than this spill from memory to a temporary file.
pub const SPOOL_SIZE: usize = 5 * 1024 * 1024;
/// 64 times the common block size of md5, sha1 and sha256 (all 64 bytes).
pub const CHUNK_SIZE: usize = 64 * 64;

enum Buffer {
    Memory(Vec<u8>),
    /// Anonymous temporary file, gone once the last handle closes.
    Disk(File),
}

/// Spools bytes while computing every digest the store wants on deploy.
pub struct HashedSpool {
    buffer: Buffer,
    md5: md5::Context,
    sha1: Sha1,
    sha256: Sha256,
    size: u64,
}

impl HashedSpool {
    pub fn new() -> Self {
        Self {
            buffer: Buffer::Memory(Vec::new()),
            md5: md5::Context::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            size: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.md5.consume(chunk);
        self.sha1.update(chunk);
        self.sha256.update(chunk);
        self.size += chunk.len() as u64;
        if let Buffer::Memory(data) = &self.buffer
            && data.len() + chunk.len() > SPOOL_SIZE
        {
            let mut file = tempfile::tempfile()?;
            file.write_all(data)?;
            self.buffer = Buffer::Disk(file);
        }
        match &mut self.buffer {
            Buffer::Memory(data) => {
                data.extend_from_slice(chunk);
                Ok(())
            },
            Buffer::Disk(file) => file.write_all(chunk),
        }
    }

    /// Spool everything `reader` produces, [`CHUNK_SIZE`] bytes at a time.
    pub fn read_from(mut reader: impl Read) -> io::Result<Spooled> {
        let mut spool = Self::new();
        let mut buffer = vec![0; CHUNK_SIZE];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => spool.update(&buffer[..n])?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        spool.finish()
    }

    pub fn finish(self) -> io::Result<Spooled> {
        let checksums = Checksums {
            md5: format!("{:x}", self.md5.compute()),
            sha1: hex::encode(self.sha1.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
        };
        let stored = match self.buffer {
            Buffer::Memory(data) => Stored::Memory(Bytes::from(data)),
            Buffer::Disk(mut file) => {
                file.flush()?;
                Stored::Disk(file)
            },
        };
        Ok(Spooled { stored, checksums, size: self.size })
    }
}

impl Default for HashedSpool {
    fn default() -> Self {
        Self::new()
    }
}

enum Stored {
    Memory(Bytes),
    Disk(File),
}

/// Fully spooled bytes and their digests.
///
/// Every reader starts from the beginning. Readers over a rolled spool share
/// one file offset, so use them one after another.
pub struct Spooled {
    stored: Stored,
    pub checksums: Checksums,
    pub size: u64,
}

impl Spooled {
    pub fn sha256(&self) -> &str {
        &self.checksums.sha256
    }

    /// Whether the spool outgrew memory.
    pub fn is_rolled(&self) -> bool {
        matches!(self.stored, Stored::Disk(_))
    }

    fn rewound(file: &File) -> io::Result<File> {
        let mut file = file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }

    /// A blocking reader over the spooled bytes.
    pub fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(match &self.stored {
            Stored::Memory(data) => Box::new(Cursor::new(data.clone())),
            Stored::Disk(file) => Box::new(Self::rewound(file)?),
        })
    }

    /// The spooled bytes as content a store can deploy or a client can be
    /// sent.
    pub fn content(&self) -> io::Result<Content> {
        Ok(match &self.stored {
            Stored::Memory(data) => Content::from(data.clone()),
            Stored::Disk(file) => Content::new(tokio::fs::File::from_std(Self::rewound(file)?), self.size),
        })
    }
}
