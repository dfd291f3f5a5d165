//! permessage-deflate parameter negotiation (RFC 7692 Section 7).
//!
//! [`negotiate`] is a pure function from the client's offers and the
//! server policy to the agreed parameters. [`DeflateNegotiator`] wraps it
//! with an explicit per-upgrade state for callers that want to query the
//! outcome after the fact; every connection owns its own instance.

use tracing::debug;

use crate::error::{Error, Result};
use crate::extensions::deflate::{
    CLIENT_MAX_WINDOW_BITS, CLIENT_NO_CONTEXT_TAKEOVER, DeflateConfig, DeflateParams,
    MAX_WINDOW_BITS, MIN_WINDOW_BITS, PERMESSAGE_DEFLATE, SERVER_MAX_WINDOW_BITS,
    SERVER_NO_CONTEXT_TAKEOVER, ZLIB_MIN_WINDOW_BITS,
};
use crate::extensions::{ExtensionOffer, ExtensionParam};

/// The parameters of one permessage-deflate offer, validated.
#[derive(Debug, Default, PartialEq, Eq)]
struct OfferedParams {
    server_no_context_takeover: bool,
    client_no_context_takeover: bool,
    server_max_window_bits: Option<u8>,
    /// `Some(None)` when offered without a value.
    client_max_window_bits: Option<Option<u8>>,
}

fn parse_window_bits(name: &str, value: &str) -> Result<u8> {
    let bits: u8 = value
        .parse()
        .map_err(|_| Error::InvalidExtension(format!("{}: invalid value {:?}", name, value)))?;
    if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
        return Err(Error::InvalidExtension(format!(
            "{} must be {}-{}, got {}",
            name, MIN_WINDOW_BITS, MAX_WINDOW_BITS, bits
        )));
    }
    Ok(bits)
}

impl OfferedParams {
    fn parse(offer: &ExtensionOffer) -> Result<Self> {
        let mut parsed = Self::default();
        let mut seen: Vec<&str> = Vec::with_capacity(offer.params.len());

        for param in &offer.params {
            let name = param.name.as_str();
            if seen.contains(&name) {
                return Err(Error::InvalidExtension(format!("Duplicate parameter: {}", name)));
            }
            seen.push(name);

            match (name, param.value.as_deref()) {
                (SERVER_NO_CONTEXT_TAKEOVER, None) => parsed.server_no_context_takeover = true,
                (CLIENT_NO_CONTEXT_TAKEOVER, None) => parsed.client_no_context_takeover = true,
                (SERVER_NO_CONTEXT_TAKEOVER | CLIENT_NO_CONTEXT_TAKEOVER, Some(_)) => {
                    return Err(Error::InvalidExtension(format!("{} takes no value", name)));
                }
                (SERVER_MAX_WINDOW_BITS, Some(value)) => {
                    parsed.server_max_window_bits = Some(parse_window_bits(name, value)?);
                }
                (SERVER_MAX_WINDOW_BITS, None) => {
                    return Err(Error::InvalidExtension(format!("{} requires a value", name)));
                }
                (CLIENT_MAX_WINDOW_BITS, value) => {
                    parsed.client_max_window_bits = Some(
                        value
                            .map(|v| parse_window_bits(name, v))
                            .transpose()?,
                    );
                }
                _ => {
                    return Err(Error::InvalidExtension(format!("Unknown parameter: {}", name)));
                }
            }
        }

        Ok(parsed)
    }
}

/// Intersect one valid offer with the server policy.
fn accept(
    offer: &OfferedParams,
    policy: &DeflateParams,
) -> Option<(DeflateParams, ExtensionOffer)> {
    let mut response = Vec::new();

    let server_no_context_takeover =
        policy.server_no_context_takeover || offer.server_no_context_takeover;
    if server_no_context_takeover {
        response.push(ExtensionParam::flag(SERVER_NO_CONTEXT_TAKEOVER));
    }

    let client_no_context_takeover =
        policy.client_no_context_takeover || offer.client_no_context_takeover;
    if client_no_context_takeover {
        response.push(ExtensionParam::flag(CLIENT_NO_CONTEXT_TAKEOVER));
    }

    let server_max_window_bits = offer
        .server_max_window_bits
        .map_or(policy.server_max_window_bits, |bits| {
            bits.min(policy.server_max_window_bits)
        });
    if server_max_window_bits < ZLIB_MIN_WINDOW_BITS {
        return None;
    }
    if offer.server_max_window_bits.is_some() || server_max_window_bits < MAX_WINDOW_BITS {
        response.push(ExtensionParam::new(
            SERVER_MAX_WINDOW_BITS,
            server_max_window_bits.to_string(),
        ));
    }

    let client_max_window_bits = match offer.client_max_window_bits {
        Some(value) => {
            let bits = value
                .unwrap_or(MAX_WINDOW_BITS)
                .min(policy.client_max_window_bits);
            response.push(ExtensionParam::new(CLIENT_MAX_WINDOW_BITS, bits.to_string()));
            bits
        }
        // The client never said it can honour a smaller window.
        None if policy.client_max_window_bits < MAX_WINDOW_BITS => return None,
        None => MAX_WINDOW_BITS,
    };

    let params = DeflateParams {
        server_no_context_takeover,
        client_no_context_takeover,
        server_max_window_bits,
        client_max_window_bits,
    };
    Some((params, ExtensionOffer::with_params(PERMESSAGE_DEFLATE, response)))
}

/// Parse raw `Sec-WebSocket-Extensions` values, dropping malformed offers.
pub fn parse_offers<S: AsRef<str>>(header_values: &[S]) -> Vec<ExtensionOffer> {
    header_values
        .iter()
        .flat_map(|value| value.as_ref().split(','))
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| match ExtensionOffer::parse(s.trim()) {
            Ok(offer) => Some(offer),
            Err(err) => {
                debug!(offer = s.trim(), error = %err, "ignoring malformed extension offer");
                None
            }
        })
        .collect()
}

/// Agree on permessage-deflate parameters.
///
/// Offers are tried in client preference order. The first valid
/// permessage-deflate offer compatible with `policy` wins; invalid offers and
/// other extensions are skipped. Returns the agreed parameters with the
/// response token, or `None` when nothing can be accepted.
pub fn negotiate(
    offers: &[ExtensionOffer],
    policy: &DeflateConfig,
) -> Option<(DeflateParams, ExtensionOffer)> {
    offers
        .iter()
        .filter(|offer| offer.name.eq_ignore_ascii_case(PERMESSAGE_DEFLATE))
        .find_map(|offer| match OfferedParams::parse(offer) {
            Ok(parsed) => {
                let accepted = accept(&parsed, &policy.params);
                if accepted.is_none() {
                    debug!(%offer, "permessage-deflate offer incompatible with policy");
                }
                accepted
            }
            Err(err) => {
                debug!(%offer, error = %err, "skipping unusable permessage-deflate offer");
                None
            }
        })
}

impl DeflateParams {
    /// Read the parameters a server accepted from its response token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the token is not a valid
    /// permessage-deflate response.
    pub fn from_response(response: &ExtensionOffer) -> Result<Self> {
        if !response.name.eq_ignore_ascii_case(PERMESSAGE_DEFLATE) {
            return Err(Error::InvalidExtension(format!(
                "Unexpected extension: {}",
                response.name
            )));
        }
        let parsed = OfferedParams::parse(response)?;
        Ok(Self {
            server_no_context_takeover: parsed.server_no_context_takeover,
            client_no_context_takeover: parsed.client_no_context_takeover,
            server_max_window_bits: parsed.server_max_window_bits.unwrap_or(MAX_WINDOW_BITS),
            client_max_window_bits: parsed
                .client_max_window_bits
                .flatten()
                .unwrap_or(MAX_WINDOW_BITS),
        })
    }
}

/// Outcome of one upgrade's negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    #[default]
    Pending,
    Accepted(DeflateParams),
    Rejected,
}

/// Stateful negotiator for a single upgrade.
#[derive(Debug, Clone)]
pub struct DeflateNegotiator {
    policy: DeflateConfig,
    state: NegotiationState,
    response: Option<ExtensionOffer>,
}

impl DeflateNegotiator {
    pub fn new(policy: DeflateConfig) -> Self {
        Self {
            policy,
            state: NegotiationState::Pending,
            response: None,
        }
    }

    /// Negotiate over the request's `Sec-WebSocket-Extensions` values.
    ///
    /// Returns the token to send back, if an offer was accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if this negotiator already holds an
    /// outcome; call [`reset`](Self::reset) first.
    pub fn negotiate<S: AsRef<str>>(
        &mut self,
        header_values: &[S],
    ) -> Result<Option<&ExtensionOffer>> {
        if self.state != NegotiationState::Pending {
            return Err(Error::InvalidExtension(
                "negotiation already completed".into(),
            ));
        }

        match negotiate(&parse_offers(header_values), &self.policy) {
            Some((params, response)) => {
                self.state = NegotiationState::Accepted(params);
                self.response = Some(response);
            }
            None => self.state = NegotiationState::Rejected,
        }
        Ok(self.response.as_ref())
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// The agreed parameters, if the last negotiation accepted an offer.
    pub fn accepted(&self) -> Option<DeflateParams> {
        match self.state {
            NegotiationState::Accepted(params) => Some(params),
            _ => None,
        }
    }

    pub fn response(&self) -> Option<&ExtensionOffer> {
        self.response.as_ref()
    }

    /// Forget the previous outcome.
    pub fn reset(&mut self) {
        self.state = NegotiationState::Pending;
        self.response = None;
    }
}
