//! Prost-generated protobuf types for the custom TCP protocol's frame
//! bodies (format byte `0x02`). Generated from `proto/transfer.proto` by
//! `build.rs`.

include!(concat!(env!("OUT_DIR"), "/transfer.tcp.rs"));
