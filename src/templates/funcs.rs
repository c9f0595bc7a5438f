use super::{RenderState, Scalar};
use crate::error::TemplateError;
use crate::raw::first_local_ipv4;

use pnet::util::MacAddr;
use rand_core::RngCore;
use rand_distr::{Alphanumeric, Distribution, Uniform};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Func {
    RandomInt,
    RandomIntN,
    RandomPort,
    RandomIp,
    RandomMacAddr,
    RandomPayload,
    RandomUuid,
    Counter,
    LocalIp,
    Add,
}

const FUNCS: [Func; 10] = [
    Func::RandomInt,
    Func::RandomIntN,
    Func::RandomPort,
    Func::RandomIp,
    Func::RandomMacAddr,
    Func::RandomPayload,
    Func::RandomUuid,
    Func::Counter,
    Func::LocalIp,
    Func::Add,
];

impl Func {
    pub(super) fn from_name(name: &str) -> Result<Func, TemplateError> {
        FUNCS
            .into_iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| TemplateError::UnknownFunction(name.to_string()))
    }

    pub(super) fn name(self) -> &'static str {
        match self {
            Func::RandomInt => "random_int",
            Func::RandomIntN => "random_int_n",
            Func::RandomPort => "random_port",
            Func::RandomIp => "random_ip",
            Func::RandomMacAddr => "random_mac_addr",
            Func::RandomPayload => "random_payload",
            Func::RandomUuid => "random_uuid",
            Func::Counter => "counter",
            Func::LocalIp => "local_ip",
            Func::Add => "add",
        }
    }

    fn arity(self) -> usize {
        match self {
            Func::RandomInt | Func::Add => 2,
            Func::RandomIntN | Func::RandomPayload | Func::Counter => 1,
            Func::RandomPort
            | Func::RandomIp
            | Func::RandomMacAddr
            | Func::RandomUuid
            | Func::LocalIp => 0,
        }
    }

    pub(super) fn check_arity(self, got: usize) -> Result<(), TemplateError> {
        if got == self.arity() {
            Ok(())
        } else {
            Err(TemplateError::Arity {
                name: self.name(),
                expected: self.arity(),
                got,
            })
        }
    }

    fn bad_argument(self, msg: String) -> TemplateError {
        TemplateError::Argument {
            name: self.name(),
            msg,
        }
    }

    /// Arity has been checked at compile time
    pub(super) fn call(
        self,
        args: &[Scalar],
        state: &mut RenderState,
    ) -> Result<Scalar, TemplateError> {
        let rng = &mut state.rng;
        Ok(match self {
            Func::RandomInt => {
                let (lo, hi) = (args[0].as_int(self.name())?, args[1].as_int(self.name())?);
                if lo > hi {
                    return Err(self.bad_argument(format!("empty range [{lo}, {hi}]")));
                }
                Scalar::Int(Uniform::new_inclusive(lo, hi).sample(rng))
            }
            Func::RandomIntN => {
                let n = args[0].as_int(self.name())?;
                if n <= 0 {
                    return Err(self.bad_argument(format!("{n} is not positive")));
                }
                Scalar::Int(Uniform::new(0, n).sample(rng))
            }
            Func::RandomPort => Scalar::Int(Uniform::new_inclusive(1, 65535).sample(rng)),
            Func::RandomIp => Scalar::Str(Ipv4Addr::from(rng.next_u32()).to_string()),
            Func::RandomMacAddr => {
                let mut b = [0u8; 6];
                rng.fill_bytes(&mut b);
                Scalar::Str(MacAddr::new(b[0], b[1], b[2], b[3], b[4], b[5]).to_string())
            }
            Func::RandomPayload => {
                let n = args[0].as_int(self.name())?;
                let n = usize::try_from(n)
                    .map_err(|_| self.bad_argument(format!("negative length {n}")))?;
                Scalar::Str(
                    Alphanumeric
                        .sample_iter(rng)
                        .take(n)
                        .map(char::from)
                        .collect(),
                )
            }
            Func::RandomUuid => {
                let mut bytes = [0u8; 16];
                rng.fill_bytes(&mut bytes);
                Scalar::Str(uuid::Builder::from_random_bytes(bytes).into_uuid().to_string())
            }
            Func::Counter => {
                let value = state.counters.entry(args[0].to_string()).or_insert(0);
                let current = *value;
                *value += 1;
                Scalar::Int(current)
            }
            Func::LocalIp => {
                let ip = *state
                    .local_ip
                    .get_or_insert_with(|| first_local_ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED));
                Scalar::Str(ip.to_string())
            }
            Func::Add => {
                let (a, b) = (args[0].as_int(self.name())?, args[1].as_int(self.name())?);
                Scalar::Int(
                    a.checked_add(b)
                        .ok_or_else(|| self.bad_argument(format!("{a} + {b} overflows")))?,
                )
            }
        })
    }
}
