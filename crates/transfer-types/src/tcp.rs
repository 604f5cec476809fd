//! Custom TCP wire frame layout and command table (spec §3, §6).

/// Magic bytes opening every frame.
pub const MAGIC: u16 = 0xAA55;
/// Trailer bytes closing every frame.
pub const TRAILER: u16 = 0x55AA;
/// Only payload format the protocol speaks.
pub const FORMAT_PROTOBUF: u8 = 0x02;
/// Upper bound on `data_length` (spec §4.1).
pub const MAX_FRAME_BODY: usize = 8 * 1024 * 1024;

/// Command byte values (spec §6). Unknown values decode to [`Command::Unknown`]
/// rather than failing: the multiplexer logs and drops unknown sequences,
/// it does not treat an unknown command byte alone as a protocol error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Ping,
    Pong,
    Connect,
    Disconnect,
    ListFiles,
    FileInfo,
    CreateDir,
    DeleteFile,
    RenameFile,
    UploadFile,
    DownloadFile,
    UploadReq,
    UploadData,
    UploadEnd,
    DownloadReq,
    DownloadData,
    DownloadEnd,
    Success,
    Error,
    Progress,
    Unknown(u8),
}

impl Command {
    pub fn to_byte(self) -> u8 {
        match self {
            Command::Ping => 0x01,
            Command::Pong => 0x02,
            Command::Connect => 0x03,
            Command::Disconnect => 0x04,
            Command::ListFiles => 0x10,
            Command::FileInfo => 0x11,
            Command::CreateDir => 0x12,
            Command::DeleteFile => 0x13,
            Command::RenameFile => 0x14,
            Command::UploadFile => 0x20,
            Command::DownloadFile => 0x21,
            Command::UploadReq => 0x30,
            Command::UploadData => 0x31,
            Command::UploadEnd => 0x32,
            Command::DownloadReq => 0x33,
            Command::DownloadData => 0x34,
            Command::DownloadEnd => 0x35,
            Command::Success => 0x80,
            Command::Error => 0x81,
            Command::Progress => 0x82,
            Command::Unknown(b) => b,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Command::Ping,
            0x02 => Command::Pong,
            0x03 => Command::Connect,
            0x04 => Command::Disconnect,
            0x10 => Command::ListFiles,
            0x11 => Command::FileInfo,
            0x12 => Command::CreateDir,
            0x13 => Command::DeleteFile,
            0x14 => Command::RenameFile,
            0x20 => Command::UploadFile,
            0x21 => Command::DownloadFile,
            0x30 => Command::UploadReq,
            0x31 => Command::UploadData,
            0x32 => Command::UploadEnd,
            0x33 => Command::DownloadReq,
            0x34 => Command::DownloadData,
            0x35 => Command::DownloadEnd,
            0x80 => Command::Success,
            0x81 => Command::Error,
            0x82 => Command::Progress,
            other => Command::Unknown(other),
        }
    }

    /// Terminal commands resolve/reject and remove the pending entry.
    pub fn is_terminal(self) -> bool {
        matches!(self, Command::Success | Command::Error)
    }
}

/// A decoded (or to-be-encoded) TCP frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpFrame {
    pub version: u8,
    pub command: Command,
    pub sequence_number: u16,
    pub data: Vec<u8>,
}

impl TcpFrame {
    pub fn new(version: u8, command: Command, sequence_number: u16, data: Vec<u8>) -> Self {
        Self {
            version,
            command,
            sequence_number,
            data,
        }
    }
}
