//! Fixture builders for unit tests.

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;

use super::cipher::obfuscate;
use super::inflate::PrefixOrder;
use super::keystream::{Calibration, SeedInputs};
use super::structures::{ContainerHeader, EnvelopeHeader};

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// `qCompress`-style body: length prefix then zlib stream.
pub fn qcompress(data: &[u8], order: PrefixOrder) -> Vec<u8> {
    let mut body = order.encode(data.len() as u32).to_vec();
    body.extend(zlib(data));
    body
}

/// Record payload: clear envelope then the obfuscated body.
pub fn payload(data: &[u8], timestamp: u32, calibration: Calibration) -> Vec<u8> {
    let body = qcompress(data, calibration.prefix_order);
    let inputs = SeedInputs {
        timestamp,
        uncompressed_length: data.len() as u32,
        compressed_length: (EnvelopeHeader::SIZE + body.len()) as u32,
        body_length: body.len() as u32,
    };

    let mut out = Vec::new();
    out.extend((EnvelopeHeader::SIZE as u16).to_be_bytes());
    out.extend(1u16.to_be_bytes());
    out.extend(timestamp.to_be_bytes());
    out.extend((data.len() as u32).to_be_bytes());
    out.extend(obfuscate(&body, &mut calibration.scheme.seed(&inputs)));
    out
}

pub fn record(name: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend((name.len() as u32).to_be_bytes());
    out.extend(name);
    out.extend((payload.len() as u32).to_be_bytes());
    out.extend(payload);
    out
}

pub fn container(records: &[Vec<u8>]) -> Vec<u8> {
    let word = (ContainerHeader::MAGIC << 8) | u32::from(ContainerHeader::VERSION);
    let mut out = word.to_be_bytes().to_vec();
    for r in records {
        out.extend(r);
    }
    out
}
