//! # qail-infile: MySQL `LOAD DATA LOCAL INFILE` for QAIL
//!
//! Client side of the LOCAL INFILE exchange: the server asks, mid-query, for
//! a local resource and the client streams it back as packets, ends with an
//! empty packet and reads the completion.
//!
//! Three kinds of resources can be requested:
//!
//! | Request name        | Source                                   |
//! |---------------------|------------------------------------------|
//! | `/path/to/file.csv` | whitelisted file (or `allow_all_files`)  |
//! | `Reader::<name>`    | reader registered under `<name>`         |
//! | `Data::Data`        | rows pushed with `write_row`             |
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use qail_infile::prelude::*;
//!
//! let registry = InfileRegistry::shared();
//! registry.register_file("/home/gopher/data.csv");
//! registry.register_reader("csv", || Some(LocalStream::from_bytes("1,foo\n")));
//!
//! let io = PacketStream::new(tcp_stream);
//! let mut conn = InfileConnection::new(io, registry, InfileConfig::default());
//! conn.execute("LOAD DATA LOCAL INFILE 'Reader::csv' INTO TABLE foo").await?;
//!
//! let rows = vec![vec![Value::Int(1), Value::from("foo")]];
//! conn.load_rows("LOAD DATA LOCAL INFILE 'Data::Data' INTO TABLE foo", &rows).await?;
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod rows;
pub mod source;
pub mod transport;
pub mod value;

pub use config::{InfileConfig, Location};
pub use encoder::{EncodedValue, encode_value, escape_row_text};
pub use error::{InfileError, InfileResult};
pub use handler::InfileConnection;
pub use protocol::OkPacket;
pub use registry::InfileRegistry;
pub use source::{CloseableReader, LocalStream, ReaderHandler};
pub use transport::{PacketIo, PacketStream};
pub use value::Value;

pub mod prelude {
    pub use crate::{
        CloseableReader, InfileConfig, InfileConnection, InfileError, InfileRegistry,
        InfileResult, LocalStream, Location, OkPacket, PacketIo, PacketStream, ReaderHandler,
        Value,
    };
}
