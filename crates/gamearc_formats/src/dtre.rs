//! DTRE: a folder tree where folders point at their child tables by offset.
//!
//! The header is the magic `DTRE` followed by the u32 offset of the root node. Every node is
//!
//! | Field      | Size          |                                         |
//! |------------|---------------|-----------------------------------------|
//! | kind       | u8            | 0 file, 1 folder                        |
//! | name size  | u8            |                                         |
//! | name       | name size     | not terminated                          |
//! | file       | u32, u32      | data offset, data length                |
//! | folder     | u32           | offset of the child table               |
//!
//! A child table is a u32 node count followed by the nodes. The root node must be a folder; its
//! name becomes the first component of every path.

use gamearc_core::{
    decode::{check_count, walk_tree, TreeNode},
    error::{Error, Result},
    signature::leading_bytes,
    ByteCursor, DecodeContext, EntryDescriptor, FormatDecoder, ScoreCard, SourceLocation,
};
use tracing::{instrument, trace};

const MAGIC: &[u8; 4] = b"DTRE";
const KIND_FILE: u8 = 0;
const KIND_FOLDER: u8 = 1;

/// Smallest possible node: kind, an empty name and a folder offset
const MIN_NODE_SIZE: u64 = 6;

/// Folders nested deeper than this are treated as corrupt
pub const MAX_DEPTH: usize = 64;

/// Decoder for DTRE folder trees
#[derive(Debug, Default, Clone, Copy)]
pub struct Dtre;

fn read_node(cursor: &mut ByteCursor, source: &SourceLocation) -> Result<TreeNode> {
    let kind = cursor.read_u8()?;
    let name_size = cursor.read_u8()?;
    let name = cursor.read_fixed_string(name_size as usize)?;
    match kind {
        KIND_FILE => {
            let offset = cursor.read_u32()? as u64;
            let length = cursor.read_u32()? as u64;
            cursor.check_range("entry", offset, length)?;
            let entry = EntryDescriptor::builder()
                .source(source.clone())
                .data_offset(offset)
                .stored_length(length)
                .build();
            Ok(TreeNode::File { name, entry })
        }
        KIND_FOLDER => Ok(TreeNode::Folder {
            name,
            offset: cursor.read_u32()? as u64,
        }),
        other => Err(Error::variant(format!("unknown node kind {other}"))),
    }
}

impl FormatDecoder for Dtre {
    fn id(&self) -> &'static str {
        "dtre"
    }

    fn description(&self) -> &'static str {
        "DTRE folder tree"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["dtre", "dtr"]
    }

    fn rate(&self, cursor: &mut ByteCursor, card: &mut ScoreCard, source: &SourceLocation) -> Result<()> {
        card.magic(&leading_bytes(cursor, 4)?, MAGIC);
        card.extension(source, self.extensions());

        let root = cursor.read_u32()? as u64;
        if card.plausible(root + MIN_NODE_SIZE <= cursor.len()) {
            cursor.seek(root)?;
            card.plausible(cursor.read_u8()? == KIND_FOLDER);
        }
        Ok(())
    }

    #[instrument(skip_all, err)]
    fn decode(
        &self,
        cursor: &mut ByteCursor,
        source: &SourceLocation,
        ctx: &mut DecodeContext,
    ) -> Result<Vec<EntryDescriptor>> {
        cursor.skip(MAGIC.len() as u64)?;
        let root = cursor.read_u32()? as u64;
        cursor.check_range("root node", root, MIN_NODE_SIZE)?;
        cursor.seek(root)?;

        let TreeNode::Folder { name, offset } = read_node(cursor, source)? else {
            return Err(Error::variant("root node is not a folder"));
        };

        let ctx: &DecodeContext = ctx;
        walk_tree(cursor, ctx, &name, offset, MAX_DEPTH, |c, offset| {
            c.seek(offset)?;
            let declared = c.read_u32()? as u64;
            let count = check_count(ctx, declared, MIN_NODE_SIZE, c.remaining()?)?;
            trace!(offset, nodes = count.get(), "child table");
            (0..count.get()).map(|_| read_node(c, source)).collect()
        })
    }
}

#[cfg(test)]
mod test {
    use gamearc_core::{
        error::{Error, Result},
        ByteCursor, ByteWriter, DecodeContext, FormatDecoder, SourceLocation,
    };
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::dtre::Dtre;

    fn file(w: &mut ByteWriter<std::io::Cursor<Vec<u8>>>, name: &str, offset: u32, length: u32) -> Result<()> {
        w.write_u8(0)?;
        w.write_u8(name.len() as u8)?;
        w.write_bytes(name.as_bytes())?;
        w.write_u32(offset)?;
        w.write_u32(length)
    }

    fn folder(w: &mut ByteWriter<std::io::Cursor<Vec<u8>>>, name: &str, offset: u32) -> Result<()> {
        w.write_u8(1)?;
        w.write_u8(name.len() as u8)?;
        w.write_bytes(name.as_bytes())?;
        w.write_u32(offset)
    }

    /// root { leaf1, leaf2, sub { leaf3 } }, with `sub` pointing at `sub_table`
    fn tree(sub_table: u32) -> Result<Vec<u8>> {
        let mut w = ByteWriter::in_memory();
        w.write_bytes(b"DTRE")?;
        w.write_u32(8)?;
        // root node, 18 bytes in
        folder(&mut w, "root", 18)?;
        w.write_u32(3)?;
        file(&mut w, "leaf1", 80, 3)?;
        file(&mut w, "leaf2", 83, 3)?;
        folder(&mut w, "sub", sub_table)?;
        // sub table at 61
        w.write_u32(1)?;
        file(&mut w, "leaf3", 86, 5)?;
        w.write_bytes(b"onetwothree")?;
        Ok(w.into_bytes())
    }

    fn decode(data: Vec<u8>) -> Result<Vec<(String, Vec<u8>)>> {
        let length = data.len() as u64;
        let mut cursor = ByteCursor::from_bytes(data);
        let entries = Dtre.read_directory(&mut cursor, &SourceLocation::memory(length), &mut DecodeContext::default())?;
        entries
            .into_iter()
            .map(|e| {
                cursor.seek(e.data_offset())?;
                Ok((e.name().unwrap_or_default().to_string(), cursor.read_bytes(e.stored_length())?))
            })
            .collect()
    }

    #[traced_test]
    #[test]
    fn nested_paths_are_joined() -> Result<()> {
        let data = tree(61)?;
        assert_eq!(data.len(), 91);

        assert_eq!(
            decode(data)?,
            vec![
                ("root\\leaf1".to_string(), b"one".to_vec()),
                ("root\\leaf2".to_string(), b"two".to_vec()),
                ("root\\sub\\leaf3".to_string(), b"three".to_vec()),
            ]
        );

        Ok(())
    }

    #[test]
    fn folder_cycle_is_detected() -> Result<()> {
        let result = decode(tree(18)?);
        assert!(matches!(result, Err(Error::DirectoryCycle(18))));
        Ok(())
    }

    #[test]
    fn file_as_root_is_rejected() -> Result<()> {
        let mut data = tree(61)?;
        data[8] = 0;
        assert!(matches!(decode(data), Err(Error::UnexpectedFormatVariant(_))));
        Ok(())
    }

    #[test]
    fn depth_is_bounded() -> Result<()> {
        // a chain of folders, each table holding one sub-folder
        let mut w = ByteWriter::in_memory();
        w.write_bytes(b"DTRE")?;
        w.write_u32(8)?;
        folder(&mut w, "r", 15)?;
        for depth in 0..super::MAX_DEPTH as u32 + 2 {
            let table = 15 + depth * 11;
            w.write_u32(1)?;
            folder(&mut w, "d", table + 11)?;
        }
        w.write_u32(0)?;

        let result = decode(w.into_bytes());
        assert!(matches!(
            result,
            Err(Error::StructuralViolation { what: "folder depth", .. })
        ));
        Ok(())
    }
}
