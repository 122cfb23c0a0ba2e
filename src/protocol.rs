use anyhow::{Context, Result};
use std::io::{BufRead, Read, Write};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::pack::{group_by_pack, send_pack, IndexCursor, PackSummary};
use crate::pktline::{PktLineWriter, MAX_PKT_LEN};
use crate::repo::Repository;

/// The client's flush packet followed by its `done` packet, as one text line
pub const DONE_LINE: &[u8] = b"00000009done";

/// Where a session is in the upload-pack exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Send the ref advertisement
    Advertise,
    /// Read client lines until `done`
    AwaitDone,
    /// Send `NAK` and the pack
    Assemble,
    /// Nothing more will be written
    Terminal,
}

/// One upload-pack exchange over an input/output channel pair.
///
/// Sessions share nothing; everything they need arrives through `new`.
pub struct Session<'a, R, W> {
    config: &'a ServerConfig,
    repo: Repository,
    input: R,
    output: PktLineWriter<W>,
    state: SessionState,
}

impl<'a, R: BufRead, W: Write> Session<'a, R, W> {
    /// Validate the configuration and open the repository. Nothing is
    /// written to `output` if this fails.
    pub fn new(config: &'a ServerConfig, input: R, output: W) -> Result<Self> {
        config.validate()?;
        let repo = Repository::open(&config.repo)
            .with_context(|| format!("Failed to open repository {:?}", config.repo))?;
        Ok(Self {
            config,
            repo,
            input,
            output: PktLineWriter::new(output),
            state: SessionState::Advertise,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion.
    ///
    /// Returns `None` when the client hung up before `done`, which is how
    /// a fetch that needs nothing ends.
    pub fn run(mut self) -> Result<Option<PackSummary>> {
        loop {
            match self.state {
                SessionState::Advertise => {
                    self.advertise()?;
                    self.state = SessionState::AwaitDone;
                }
                SessionState::AwaitDone => {
                    if self.await_done()? {
                        self.state = SessionState::Assemble;
                    } else {
                        self.state = SessionState::Terminal;
                        return Ok(None);
                    }
                }
                SessionState::Assemble => {
                    let summary = self.assemble()?;
                    self.state = SessionState::Terminal;
                    return Ok(Some(summary));
                }
                SessionState::Terminal => {
                    return Err(Error::Protocol("session already finished".to_string()).into());
                }
            }
        }
    }

    fn advertise(&mut self) -> Result<()> {
        let ref_name = self.config.ref_name();
        // Read before writing anything: a missing ref must produce no output.
        let tip = self
            .repo
            .read_branch_tip(&self.config.branch)
            .with_context(|| format!("Failed to read {}", ref_name))?;
        tracing::info!("Advertising {} at {}", ref_name, tip);

        self.output.write_line(&format!(
            "{} HEAD\0object-format=sha1 symref=HEAD:{}",
            tip, ref_name
        ))?;
        self.output.write_line(&format!("{} {}", tip, ref_name))?;
        self.output.flush_pkt()?;
        self.output
            .flush()
            .context("Failed to flush ref advertisement")?;
        Ok(())
    }

    // Wants and haves are not parsed: the whole object set is always sent.
    fn await_done(&mut self) -> Result<bool> {
        let mut line = Vec::new();
        let mut ignored = 0usize;
        let mut continuation = false;
        loop {
            line.clear();
            let n = (&mut self.input)
                .take(MAX_PKT_LEN as u64)
                .read_until(b'\n', &mut line)
                .context("Failed to read negotiation input")?;
            if n == 0 {
                tracing::debug!(
                    "Client closed the connection before done after {} line(s)",
                    ignored
                );
                return Ok(false);
            }

            if !continuation && strip_line_ending(&line) == DONE_LINE {
                tracing::debug!("Received done after {} ignored line(s)", ignored);
                return Ok(true);
            }
            continuation = !line.ends_with(b"\n");
            ignored += 1;
        }
    }

    fn assemble(&mut self) -> Result<PackSummary> {
        self.output.write_line("NAK")?;

        let pack_dir = self.repo.pack_dir();
        let mut cursor = IndexCursor::open(&pack_dir, self.config.index_policy)?;
        let locators = cursor
            .by_ref()
            .collect::<crate::error::Result<Vec<_>>>()
            .context("Failed to enumerate pack indexes")?;
        if let Some(skipped) = cursor.skipped_summary() {
            tracing::warn!("{} (index policy: {})", skipped, cursor.policy());
        }

        let groups = group_by_pack(locators);
        send_pack(&groups, self.output.get_mut())
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Run one session over `input`/`output` with `config`
pub fn serve<R: BufRead, W: Write>(
    config: &ServerConfig,
    input: R,
    output: W,
) -> Result<Option<PackSummary>> {
    Session::new(config, input, output)?.run()
}
