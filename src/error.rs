use std::io;
use std::num::ParseIntError;

use thiserror::Error;

/// Errors raised while compiling or rendering a template
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("syntax error at offset {pos}: {msg}")]
    Syntax { pos: usize, msg: String },

    #[error("unknown function \"{0}\"")]
    UnknownFunction(String),

    #[error("function \"{name}\" expects {expected} argument(s), got {got}")]
    Arity {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("bad argument for \"{name}\": {msg}")]
    Argument { name: &'static str, msg: String },
}

/// Errors raised while coercing a rendered packet into a `PacketDescription`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid packet: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read job file: {0}")]
    Io(#[from] io::Error),

    #[error("ill-formed job file: {0}")]
    Parse(String),

    #[error("invalid {field} template: {source}")]
    Template {
        field: &'static str,
        #[source]
        source: TemplateError,
    },

    #[error("invalid port \"{value}\": {source}")]
    InvalidPort {
        value: String,
        #[source]
        source: ParseIntError,
    },
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("unsupported network type \"{0}\"")]
    UnsupportedNetwork(String),

    #[error("\"{0}\" is not a local IPv4 address")]
    InvalidAddress(String),

    #[error("cannot open raw socket: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("cannot resolve \"{0}\" to an IPv4 address")]
    Resolve(String),

    #[error("packet of {0} bytes does not fit in an IPv4 datagram")]
    TooLarge(usize),

    #[error("cannot encode the {0} header")]
    Encode(&'static str),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// Terminal error of a flood job
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot compile packet template: {0}")]
    Compile(#[source] TemplateError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("cannot render packet template: {0}")]
    Render(#[source] TemplateError),

    #[error("cannot decode rendered packet: {0}")]
    Decode(#[from] DecodeError),

    #[error("failed to send packet: {0}")]
    Send(#[from] SendError),

    #[error("cannot start the traffic monitor: {0}")]
    Monitor(#[source] io::Error),

    #[error("job panicked: {0}")]
    Panicked(String),
}
