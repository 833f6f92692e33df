//! Builders for small archives of every format.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use gamearc_core::{
    codec::{encode_block, Transform},
    ByteWriter,
};
use gamearc_formats::{
    rpak::{entry_pipeline, DIRECTORY_KEY},
    tre::{CompressionMethod, TreWriter, TreWriterOptions},
};

pub type Files<'a> = &'a [(&'a str, &'a [u8])];

pub fn xarc(files: Files) -> Vec<u8> {
    let names_length = files.iter().map(|(n, _)| n.len() + 1).sum::<usize>() as u32;
    let mut data_offset = 8 + 16 * files.len() as u32 + names_length;
    let mut name_offset = 0;

    let mut w = ByteWriter::in_memory();
    w.write_bytes(b"XARC").unwrap();
    w.write_u32(files.len() as u32).unwrap();
    for (name, content) in files {
        w.write_u32(data_offset).unwrap();
        w.write_u32(content.len() as u32).unwrap();
        w.write_u32(name_offset).unwrap();
        w.write_u32(0).unwrap();
        data_offset += content.len() as u32;
        name_offset += name.len() as u32 + 1;
    }
    for (name, _) in files {
        w.write_null_terminated_string(name).unwrap();
    }
    for (_, content) in files {
        w.write_bytes(content).unwrap();
    }
    w.into_bytes()
}

pub fn ofs(contents: &[&[u8]]) -> Vec<u8> {
    let mut offset = 4 * (contents.len() as u32 + 1);
    let mut w = ByteWriter::in_memory();
    for content in contents {
        w.write_u32(offset).unwrap();
        offset += content.len() as u32;
    }
    w.write_u32(offset).unwrap();
    for content in contents {
        w.write_bytes(content).unwrap();
    }
    w.into_bytes()
}

fn dtre_node(w: &mut ByteWriter<Cursor<Vec<u8>>>, kind: u8, name: &str) {
    w.write_u8(kind).unwrap();
    w.write_u8(name.len() as u8).unwrap();
    w.write_bytes(name.as_bytes()).unwrap();
}

/// `root\leaf1`, `root\leaf2` and `root\sub\leaf3`
pub fn dtre() -> Vec<u8> {
    let mut w = ByteWriter::in_memory();
    w.write_bytes(b"DTRE").unwrap();
    w.write_u32(8).unwrap();
    dtre_node(&mut w, 1, "root");
    w.write_u32(18).unwrap();

    w.write_u32(3).unwrap();
    dtre_node(&mut w, 0, "leaf1");
    w.write_u32(80).unwrap();
    w.write_u32(6).unwrap();
    dtre_node(&mut w, 0, "leaf2");
    w.write_u32(86).unwrap();
    w.write_u32(6).unwrap();
    dtre_node(&mut w, 1, "sub");
    w.write_u32(61).unwrap();

    w.write_u32(1).unwrap();
    dtre_node(&mut w, 0, "leaf3");
    w.write_u32(92).unwrap();
    w.write_u32(6).unwrap();

    w.write_bytes(b"leaf1!leaf2!leaf3!").unwrap();
    w.into_bytes()
}

pub fn tre(files: Files, compression: CompressionMethod) -> Vec<u8> {
    let options = TreWriterOptions::builder()
        .record_compression(compression)
        .name_compression(compression)
        .build();
    let mut writer = TreWriter::new(Cursor::new(Vec::new()), options);
    for (name, content) in files {
        writer.start_file(name, compression).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn rpak(files: Files, flags: u32) -> Vec<u8> {
    let data_start = 16 + 64 * files.len() as u32;
    let mut data = Vec::new();
    let mut directory = ByteWriter::in_memory();
    for (name, content) in files {
        let stored = encode_block(content, &entry_pipeline(flags)).unwrap();
        directory.write_fixed_string(name, 48).unwrap();
        directory.write_u32(data_start + data.len() as u32).unwrap();
        directory.write_u32(stored.len() as u32).unwrap();
        directory.write_u32(content.len() as u32).unwrap();
        directory.write_u32(flags).unwrap();
        data.extend_from_slice(&stored);
    }
    let directory = encode_block(&directory.into_bytes(), &Transform::rc4(DIRECTORY_KEY).into()).unwrap();

    let mut w = ByteWriter::in_memory();
    w.write_bytes(b"RPAK").unwrap();
    w.write_u32(1).unwrap();
    w.write_u32(files.len() as u32).unwrap();
    w.write_u32(directory.len() as u32).unwrap();
    w.write_bytes(&directory).unwrap();
    w.write_bytes(&data).unwrap();
    w.into_bytes()
}

/// Sprites of `width x 1` pixels, all using palette 0
pub fn sprb(widths: &[u16]) -> Vec<u8> {
    let table = 8 + 768;
    let mut offset = table + 4 * widths.len() as u32;
    let mut w = ByteWriter::in_memory();
    w.write_bytes(b"SPRB").unwrap();
    w.write_u16(widths.len() as u16).unwrap();
    w.write_u16(1).unwrap();
    w.write_bytes(&[0u8; 768]).unwrap();
    for width in widths {
        w.write_u32(offset).unwrap();
        offset += 9 + *width as u32;
    }
    for width in widths {
        w.write_u32(*width as u32).unwrap();
        w.write_u16(*width).unwrap();
        w.write_u16(1).unwrap();
        w.write_u8(0).unwrap();
        w.write_bytes(&vec![7u8; *width as usize]).unwrap();
    }
    w.into_bytes()
}

pub fn lump(files: Files) -> Vec<u8> {
    let directory = 8 + files.iter().map(|(_, c)| c.len()).sum::<usize>() as u32;
    let mut w = ByteWriter::in_memory();
    w.write_bytes(b"LUMP").unwrap();
    w.write_u32(directory).unwrap();
    for (_, content) in files {
        w.write_bytes(content).unwrap();
    }
    for (name, content) in files {
        w.write_fixed_string(name, 12).unwrap();
        w.write_u32(content.len() as u32).unwrap();
    }
    w.write_bytes(&[0u8; 16]).unwrap();
    w.into_bytes()
}
