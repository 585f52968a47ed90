// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
use std::net::Ipv4Addr;

use crate::error::CreationError;

/// An IPv4 network: an address with its host bits cleared, paired with a netmask.
///
/// Parses `A.B.C.D`, `A.B.C.D/prefixlen` (0..=32), and `A.B.C.D/E.F.G.H`.  After
/// construction, `address & !netmask == 0` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    address: u32,
    netmask: u32,
}

impl Network {
    pub fn new(address: Ipv4Addr, netmask: Ipv4Addr) -> Network {
        let netmask = u32::from(netmask);
        let address = u32::from(address) & netmask;
        Network { address, netmask }
    }

    pub fn parse(spec: &str) -> Result<Network, CreationError> {
        let (addr_part, mask_part) = match spec.find('/') {
            Some(pos) => (&spec[..pos], Some(&spec[pos + 1..])),
            None => (spec, None),
        };

        let address: Ipv4Addr = addr_part
            .parse()
            .map_err(|_| CreationError::invalid(format!("invalid IPv4 address '{}'", addr_part)))?;

        let netmask = match mask_part {
            None => Ipv4Addr::new(255, 255, 255, 255),
            Some(m) if m.contains('.') => {
                m.parse()
                    .map_err(|_| CreationError::invalid(format!("invalid netmask '{}'", m)))?
            },
            Some(m) => {
                let prefix: u32 = m
                    .parse()
                    .map_err(|_| CreationError::invalid(format!("invalid prefix length '{}'", m)))?;
                if prefix > 32 {
                    return Err(CreationError::invalid(format!("prefix length {} out of range", prefix)));
                }
                let bits = if prefix == 0 { 0u32 } else { u32::MAX << (32 - prefix) };
                Ipv4Addr::from(bits)
            },
        };

        Ok(Network::new(address, netmask))
    }

    pub fn parse_all(specs: &[String]) -> Result<Vec<Network>, CreationError> {
        specs.iter().map(|s| Network::parse(s)).collect()
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool { (u32::from(address) & self.netmask) == self.address }

    pub fn address(&self) -> Ipv4Addr { Ipv4Addr::from(self.address) }

    pub fn netmask(&self) -> Ipv4Addr { Ipv4Addr::from(self.netmask) }
}

/// Evaluates the ACL verdict for `address` against the allow/deny lists, honoring
/// `allow_first` to decide which list has the last word.
///
/// Starts from `forbidden = true`. If `allow_first`, allow-nets are applied first
/// (any containing match flips to allowed), then deny-nets (any containing match
/// flips back to forbidden). Otherwise the two passes run in the opposite order.
/// The result does not depend on list ordering within either list, only on the
/// presence of a containing network and on `allow_first`.
pub fn is_forbidden(address: Ipv4Addr, allow_first: bool, allow_nets: &[Network], deny_nets: &[Network]) -> bool {
    let mut forbidden = true;

    let apply_allow = |forbidden: &mut bool| {
        if allow_nets.iter().any(|n| n.contains(address)) {
            *forbidden = false;
        }
    };
    let apply_deny = |forbidden: &mut bool| {
        if deny_nets.iter().any(|n| n.contains(address)) {
            *forbidden = true;
        }
    };

    if allow_first {
        apply_allow(&mut forbidden);
        apply_deny(&mut forbidden);
    } else {
        apply_deny(&mut forbidden);
        apply_allow(&mut forbidden);
    }

    forbidden
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_address() {
        let n = Network::parse("127.0.0.1").unwrap();
        assert_eq!(n.address(), Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(n.netmask(), Ipv4Addr::new(255, 255, 255, 255));
    }

    #[test]
    fn parses_prefix_length() {
        let n = Network::parse("10.0.0.0/8").unwrap();
        assert_eq!(n.netmask(), Ipv4Addr::new(255, 0, 0, 0));
        assert!(n.contains(Ipv4Addr::new(10, 1, 2, 3)));
        assert!(!n.contains(Ipv4Addr::new(11, 0, 0, 0)));
    }

    #[test]
    fn parses_dotted_netmask() {
        let n = Network::parse("192.168.1.0/255.255.255.0").unwrap();
        assert!(n.contains(Ipv4Addr::new(192, 168, 1, 200)));
        assert!(!n.contains(Ipv4Addr::new(192, 168, 2, 1)));
    }

    #[test]
    fn clears_host_bits() {
        // 10.1.2.3/8 should behave exactly like 10.0.0.0/8
        let n = Network::parse("10.1.2.3/8").unwrap();
        assert_eq!(n.address(), Ipv4Addr::new(10, 0, 0, 0));
    }

    #[test]
    fn rejects_bad_prefix() {
        assert!(Network::parse("10.0.0.0/33").is_err());
    }

    #[test]
    fn allow_first_lets_deny_win() {
        let allow = vec![Network::parse("127.0.0.0/8").unwrap()];
        let deny = vec![Network::parse("127.0.0.1/32").unwrap()];
        assert!(is_forbidden(Ipv4Addr::new(127, 0, 0, 1), true, &allow, &deny));
        assert!(!is_forbidden(Ipv4Addr::new(127, 0, 0, 2), true, &allow, &deny));
    }

    #[test]
    fn deny_first_lets_allow_win() {
        let allow = vec![Network::parse("127.0.0.1/32").unwrap()];
        let deny = vec![Network::parse("127.0.0.0/8").unwrap()];
        assert!(!is_forbidden(Ipv4Addr::new(127, 0, 0, 1), false, &allow, &deny));
        assert!(is_forbidden(Ipv4Addr::new(127, 0, 0, 2), false, &allow, &deny));
    }

    #[test]
    fn verdict_independent_of_list_order() {
        let a1 = Network::parse("10.0.0.0/8").unwrap();
        let a2 = Network::parse("192.168.0.0/16").unwrap();
        let addr = Ipv4Addr::new(10, 5, 5, 5);
        let v1 = is_forbidden(addr, true, &[a1, a2], &[]);
        let v2 = is_forbidden(addr, true, &[a2, a1], &[]);
        assert_eq!(v1, v2);
    }

    #[test]
    fn no_allow_nets_means_forbidden_by_default() {
        assert!(is_forbidden(Ipv4Addr::new(8, 8, 8, 8), true, &[], &[]));
    }
}
