//! Subnet partitioning of a VPC block

use std::net::Ipv4Addr;

use trellis_core::schema::validate_cidr;

/// Prefix length of every subnet carved from a VPC
pub const SUBNET_PREFIX: u8 = 20;

/// Parse "a.b.c.d/n" into its network address and prefix length
pub fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8), String> {
    validate_cidr(cidr)?;
    let (ip, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("Invalid CIDR format '{}'", cidr))?;
    let ip: Ipv4Addr = ip
        .parse()
        .map_err(|e| format!("Invalid IP address '{}': {}", ip, e))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|e| format!("Invalid prefix length '{}': {}", prefix, e))?;
    Ok((ip, prefix))
}

/// Carve `count` consecutive /20 blocks from the start of `vpc_cidr`
pub fn carve_subnets(vpc_cidr: &str, count: usize) -> Result<Vec<String>, String> {
    let (ip, prefix) = parse_cidr(vpc_cidr)?;
    if prefix > SUBNET_PREFIX {
        return Err(format!(
            "VPC block {} is smaller than a /{} subnet",
            vpc_cidr, SUBNET_PREFIX
        ));
    }

    let available = 1u64 << (SUBNET_PREFIX - prefix);
    if count as u64 > available {
        return Err(format!(
            "VPC block {} holds {} /{} subnets, {} requested",
            vpc_cidr, available, SUBNET_PREFIX, count
        ));
    }

    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let base = u32::from(ip) & mask;
    let block = 1u32 << (32 - SUBNET_PREFIX);

    Ok((0..count as u32)
        .map(|i| format!("{}/{}", Ipv4Addr::from(base + i * block), SUBNET_PREFIX))
        .collect())
}
