//! The binary zone-dump codec: a two-pass writer/reader for a zone's
//! content tree, used to flush zone state to disk and to reload it on
//! restart without re-parsing a text zonefile.

use std::io::{self, Read, Seek, SeekFrom, Write};

use bytes::{Bytes, BytesMut};
use camino::Utf8Path;
use domain::base::iana::{Class, Rtype};
use domain::base::name::NameBuilder;
use domain::base::Ttl;
use tempfile::NamedTempFile;

use crate::node::{Node, NodeFlags, NodeId};
use crate::rdata::{Rdata, RdataItem};
use crate::rrset::{RRset, Rrsig};
use crate::{StoredName, ZoneContents};

/// Identifies this codec's wire format and its version.
const MAGIC: &[u8] = b"AZDC1\0";

/// Bound on CNAME chain walking during semantic checks (§4.3).
const MAX_CNAME_CHAIN_DEPTH: usize = 15;

/// The result of a dump: non-fatal findings from the semantic checks, which
/// are logged per-node but never abort the dump.
#[derive(Debug, Default)]
pub struct DumpReport {
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub enum DumpError {
    Io(io::Error),
    /// Something about the content tree couldn't be represented (e.g. an
    /// owner name longer than 255 octets).
    Malformed(String),
}

impl std::fmt::Display for DumpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DumpError::Io(e) => write!(f, "I/O error: {e}"),
            DumpError::Malformed(reason) => write!(f, "malformed content tree: {reason}"),
        }
    }
}

impl std::error::Error for DumpError {}

impl From<io::Error> for DumpError {
    fn from(e: io::Error) -> Self {
        DumpError::Io(e)
    }
}

/// Write `contents` to a fresh temporary file inside `target_dir`, then
/// atomically rename it into place as `final_name`.
///
/// A failure mid-write leaves the temporary file in place for the caller's
/// existing cleanup policy; a successful write is renamed in, so readers
/// never observe a partial dump.
pub fn dump_zone_to_file(
    contents: &ZoneContents,
    source_filename: &str,
    target_dir: &Utf8Path,
    final_name: &str,
    do_checks: u8,
) -> Result<DumpReport, DumpError> {
    let mut tmp = NamedTempFile::new_in(target_dir)?;
    let report = write_dump(tmp.as_file_mut(), contents, source_filename, do_checks)?;
    tmp.as_file_mut().flush()?;
    tmp.persist(target_dir.join(final_name))
        .map_err(|e| DumpError::Io(e.error))?;
    Ok(report)
}

/// The two-pass writer core, generic over any seekable writer so tests can
/// drive it against an in-memory buffer.
pub fn write_dump<W: Write + Seek>(
    writer: &mut W,
    contents: &ZoneContents,
    source_filename: &str,
    do_checks: u8,
) -> Result<DumpReport, DumpError> {
    let mut report = DumpReport::default();

    writer.write_all(MAGIC)?;

    let sf_bytes = source_filename.as_bytes();
    writer.write_all(&(sf_bytes.len() as u32).to_le_bytes())?;
    writer.write_all(sf_bytes)?;

    // Reserve the three count slots; patched once traversal is done.
    let counts_offset = writer.stream_position()?;
    writer.write_all(&[0u8; 12])?;

    let do_checks = if contents.is_dnssec_secured() {
        do_checks.max(2)
    } else {
        do_checks
    };

    if do_checks >= 1 {
        run_semantic_checks(contents, do_checks, &mut report.warnings);
    }

    let mut normal_count = 0u32;
    for (id, node) in contents.nodes() {
        write_node(writer, contents, id, node)?;
        normal_count += 1;
    }

    let mut nsec3_count = 0u32;
    for (id, node) in contents.nsec3_nodes() {
        write_node(writer, contents, id, node)?;
        nsec3_count += 1;
    }

    let end = writer.stream_position()?;
    writer.seek(SeekFrom::Start(counts_offset))?;
    writer.write_all(&normal_count.to_le_bytes())?;
    writer.write_all(&nsec3_count.to_le_bytes())?;
    writer.write_all(&contents.authoritative_node_count().to_le_bytes())?;
    writer.seek(SeekFrom::Start(end))?;

    Ok(report)
}

fn write_node<W: Write>(
    writer: &mut W,
    contents: &ZoneContents,
    id: NodeId,
    node: &Node,
) -> Result<(), DumpError> {
    let owner_wire = node.owner.as_slice();
    if owner_wire.len() > u8::MAX as usize {
        return Err(DumpError::Malformed(format!(
            "owner name {} longer than 255 wire octets",
            node.owner
        )));
    }
    writer.write_all(&[owner_wire.len() as u8])?;
    writer.write_all(owner_wire)?;

    let labels: Vec<u8> = node
        .owner
        .iter_labels()
        .map(|l| l.as_ref().len() as u8)
        .collect();
    writer.write_all(&[labels.len() as u8])?;
    writer.write_all(&labels)?;

    writer.write_all(&(id.0 as u64).to_le_bytes())?;
    writer.write_all(&(node.parent.0 as u64).to_le_bytes())?;
    writer.write_all(&[node.flags.bits()])?;
    writer.write_all(&(node.nsec3_peer.0 as u64).to_le_bytes())?;

    let rrsets: Vec<&RRset> = node.rrsets().collect();
    if rrsets.len() > u8::MAX as usize {
        return Err(DumpError::Malformed(format!(
            "node {} has more than 255 RRsets",
            node.owner
        )));
    }
    writer.write_all(&[rrsets.len() as u8])?;
    for rrset in rrsets {
        write_rrset(writer, contents, rrset)?;
    }
    Ok(())
}

fn write_rrset<W: Write>(
    writer: &mut W,
    contents: &ZoneContents,
    rrset: &RRset,
) -> Result<(), DumpError> {
    writer.write_all(&rrset.rtype.to_int().to_le_bytes())?;
    writer.write_all(&rrset.class.to_int().to_le_bytes())?;
    writer.write_all(&rrset.ttl.as_secs().to_le_bytes())?;

    if rrset.len() > u8::MAX as usize {
        return Err(DumpError::Malformed(format!(
            "rrset {}/{:?} has more than 255 records",
            rrset.owner, rrset.rtype
        )));
    }
    writer.write_all(&[rrset.len() as u8])?;
    writer.write_all(&[if rrset.rrsig.is_some() { 1 } else { 0 }])?;

    for rdata in rrset.data() {
        write_rdata(writer, contents, rdata)?;
    }
    if let Some(rrsig) = &rrset.rrsig {
        write_rrsig(writer, rrsig)?;
    }
    Ok(())
}

fn write_rdata<W: Write>(
    writer: &mut W,
    contents: &ZoneContents,
    rdata: &Rdata,
) -> Result<(), DumpError> {
    writer.write_all(&(rdata.items().len() as u16).to_le_bytes())?;
    for item in rdata.items() {
        write_rdata_item(writer, contents, item)?;
    }
    Ok(())
}

/// Item tags: `0x01` in-zone dname (8-byte node ID follows), `0x00`
/// external dname (wire bytes, then an optional closest-encloser ID),
/// `0x02` raw blob, `0x03` scalar (§4.3.2).
fn write_rdata_item<W: Write>(
    writer: &mut W,
    contents: &ZoneContents,
    item: &RdataItem,
) -> Result<(), DumpError> {
    match item {
        RdataItem::Dname(name) => {
            if let Some(id) = contents.find_node(name) {
                writer.write_all(&[0x01])?;
                writer.write_all(&(id.0 as u64).to_le_bytes())?;
            } else {
                writer.write_all(&[0x00])?;
                let wire = name.as_slice();
                writer.write_all(&(wire.len() as u16).to_le_bytes())?;
                writer.write_all(wire)?;
                match contents.closest_encloser(name) {
                    Some(id) => {
                        writer.write_all(&[1])?;
                        writer.write_all(&(id.0 as u64).to_le_bytes())?;
                    }
                    None => writer.write_all(&[0])?,
                }
            }
        }
        RdataItem::Blob(bytes) => {
            writer.write_all(&[0x02])?;
            writer.write_all(&(bytes.len() as u16).to_le_bytes())?;
            writer.write_all(bytes)?;
        }
        RdataItem::Scalar(v) => {
            writer.write_all(&[0x03])?;
            writer.write_all(&v.to_le_bytes())?;
        }
    }
    Ok(())
}

fn write_rrsig<W: Write>(writer: &mut W, rrsig: &Rrsig) -> Result<(), DumpError> {
    writer.write_all(&rrsig.type_covered.to_int().to_le_bytes())?;
    writer.write_all(&[rrsig.algorithm, rrsig.labels])?;
    writer.write_all(&rrsig.original_ttl.as_secs().to_le_bytes())?;
    writer.write_all(&rrsig.expiration.to_le_bytes())?;
    writer.write_all(&rrsig.inception.to_le_bytes())?;
    writer.write_all(&rrsig.key_tag.to_le_bytes())?;
    let signer_wire = rrsig.signer_name.as_slice();
    writer.write_all(&(signer_wire.len() as u16).to_le_bytes())?;
    writer.write_all(signer_wire)?;
    writer.write_all(&(rrsig.signature.len() as u16).to_le_bytes())?;
    writer.write_all(&rrsig.signature)?;
    Ok(())
}

//----------- semantic checks (do_checks >= 1 / == 2) ------------------------------

fn run_semantic_checks(contents: &ZoneContents, do_checks: u8, warnings: &mut Vec<String>) {
    let apex_name = &contents.apex().owner;
    let apex_dnskeys = contents.apex().rrset(Rtype::DNSKEY);

    for (_, node) in contents.nodes().chain(contents.nsec3_nodes()) {
        let Some(cname) = node.rrset(Rtype::CNAME) else {
            continue;
        };
        if cname.len() > 1 {
            warnings.push(format!("{}: multiple CNAME records on one node", node.owner));
        }
        let cohabitors: Vec<Rtype> = node
            .rrsets()
            .map(|r| r.rtype)
            .filter(|t| !matches!(t, Rtype::CNAME | Rtype::RRSIG | Rtype::NSEC))
            .collect();
        if !cohabitors.is_empty() {
            warnings.push(format!(
                "{}: CNAME node also carries {cohabitors:?}",
                node.owner
            ));
        }
        check_cname_chain(contents, node, warnings);
    }

    if do_checks < 2 {
        return;
    }

    for (_, node) in contents.nodes() {
        for rrset in node.rrsets() {
            let Some(rrsig) = &rrset.rrsig else {
                continue;
            };
            if rrsig.type_covered != rrset.rtype {
                warnings.push(format!(
                    "{}: RRSIG type-covered {:?} does not match RRset type {:?}",
                    node.owner, rrsig.type_covered, rrset.rtype
                ));
            }
            if rrsig.labels != rrset.owner_label_count() {
                warnings.push(format!(
                    "{}: RRSIG labels {} does not match owner label count {}",
                    node.owner,
                    rrsig.labels,
                    rrset.owner_label_count()
                ));
            }
            if &rrsig.signer_name != apex_name {
                warnings.push(format!(
                    "{}: RRSIG signer name {} is not the zone apex",
                    node.owner, rrsig.signer_name
                ));
            }
            if let Some(dnskeys) = apex_dnskeys {
                let matches_a_key = dnskeys.data().iter().any(|rd| {
                    rd.items()
                        .iter()
                        .any(|item| matches!(item, RdataItem::Scalar(v) if *v == rrsig.algorithm as u32))
                        && rd.items().iter().any(
                            |item| matches!(item, RdataItem::Scalar(v) if *v == rrsig.key_tag as u32),
                        )
                });
                if !matches_a_key {
                    warnings.push(format!(
                        "{}: RRSIG algorithm/key-tag does not match any apex DNSKEY",
                        node.owner
                    ));
                }
            }
        }
    }
}

fn check_cname_chain(contents: &ZoneContents, start: &Node, warnings: &mut Vec<String>) {
    let Some(cname) = start.rrset(Rtype::CNAME) else {
        return;
    };
    let Some(target) = cname.data().first().and_then(|d| d.dnames().next()) else {
        return;
    };

    let mut current = target.clone();
    for _ in 0..MAX_CNAME_CHAIN_DEPTH {
        let next_node = contents
            .find_node(&current)
            .and_then(|id| contents.node(id))
            .or_else(|| {
                contents
                    .find_nsec3_node(&current)
                    .and_then(|id| contents.nsec3_node(id))
            });
        let Some(next_node) = next_node else {
            return;
        };
        let Some(next_cname) = next_node.rrset(Rtype::CNAME) else {
            return;
        };
        let Some(next_target) = next_cname.data().first().and_then(|d| d.dnames().next()) else {
            return;
        };
        current = next_target.clone();
    }
    warnings.push(format!(
        "{}: CNAME chain did not terminate within {MAX_CNAME_CHAIN_DEPTH} hops",
        start.owner
    ));
}

//----------- reader ----------------------------------------------------------------

/// The parsed header of a dump, before node bodies are read.
pub struct DumpHeader {
    pub source_filename: String,
    pub normal_node_count: u32,
    pub nsec3_node_count: u32,
    pub authoritative_node_count: u32,
}

/// A decoded node, mirroring [`Node`] plus its dump-assigned ID.
pub struct DecodedNode {
    pub id: NodeId,
    pub node: Node,
}

/// Read the header from the start of a dump produced by [`write_dump`].
pub fn read_header<R: Read>(reader: &mut R) -> Result<DumpHeader, DumpError> {
    let mut magic = vec![0u8; MAGIC.len()];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(DumpError::Malformed("bad magic".into()));
    }

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let sflen = u32::from_le_bytes(len_buf) as usize;
    let mut sf_buf = vec![0u8; sflen];
    reader.read_exact(&mut sf_buf)?;
    let source_filename = String::from_utf8(sf_buf)
        .map_err(|_| DumpError::Malformed("source filename is not valid UTF-8".into()))?;

    let mut counts = [0u8; 12];
    reader.read_exact(&mut counts)?;
    let normal_node_count = u32::from_le_bytes(counts[0..4].try_into().unwrap());
    let nsec3_node_count = u32::from_le_bytes(counts[4..8].try_into().unwrap());
    let authoritative_node_count = u32::from_le_bytes(counts[8..12].try_into().unwrap());

    Ok(DumpHeader {
        source_filename,
        normal_node_count,
        nsec3_node_count,
        authoritative_node_count,
    })
}

/// Read `count` node records, resolving in-zone dname references against
/// `resolve` (a lookup from node ID to owner name, built from an earlier
/// pass over this same dump).
pub fn read_nodes<R: Read>(
    reader: &mut R,
    count: u32,
    resolve: &impl Fn(NodeId) -> Option<StoredName>,
) -> Result<Vec<DecodedNode>, DumpError> {
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(read_node(reader, resolve)?);
    }
    Ok(out)
}

fn read_node<R: Read>(
    reader: &mut R,
    resolve: &impl Fn(NodeId) -> Option<StoredName>,
) -> Result<DecodedNode, DumpError> {
    let mut len_buf = [0u8; 1];
    reader.read_exact(&mut len_buf)?;
    let owner_len = len_buf[0] as usize;
    let mut owner_wire = vec![0u8; owner_len];
    reader.read_exact(&mut owner_wire)?;
    let owner = StoredName::from_octets(Bytes::from(owner_wire))
        .map_err(|_| DumpError::Malformed("invalid owner wire form".into()))?;

    reader.read_exact(&mut len_buf)?;
    let label_count = len_buf[0] as usize;
    let mut labels = vec![0u8; label_count];
    reader.read_exact(&mut labels)?;

    let id = NodeId(read_u64(reader)? as u32);
    let parent = NodeId(read_u64(reader)? as u32);

    let mut flag_buf = [0u8; 1];
    reader.read_exact(&mut flag_buf)?;
    let flags = NodeFlags::from_bits(flag_buf[0]);

    let nsec3_peer = NodeId(read_u64(reader)? as u32);

    let mut count_buf = [0u8; 1];
    reader.read_exact(&mut count_buf)?;
    let rrset_count = count_buf[0];

    let mut node = Node::new(owner, parent, flags);
    node.nsec3_peer = nsec3_peer;

    for _ in 0..rrset_count {
        let rrset = read_rrset(reader, resolve)?;
        node.insert_rrset(rrset);
    }

    Ok(DecodedNode { id, node })
}

fn read_rrset<R: Read>(
    reader: &mut R,
    resolve: &impl Fn(NodeId) -> Option<StoredName>,
) -> Result<RRset, DumpError> {
    let rtype = Rtype::from_int(read_u16(reader)?);
    let class = Class::from_int(read_u16(reader)?);
    let ttl = Ttl::from_secs(read_u32(reader)?);

    let mut byte1 = [0u8; 1];
    reader.read_exact(&mut byte1)?;
    let rdata_count = byte1[0];
    reader.read_exact(&mut byte1)?;
    let has_rrsig = byte1[0] == 1;

    let mut data = Vec::with_capacity(rdata_count as usize);
    for _ in 0..rdata_count {
        data.push(read_rdata(reader, resolve)?);
    }
    if data.is_empty() {
        return Err(DumpError::Malformed("rrset with no rdata".into()));
    }

    // The owner is filled in by the caller once the arena is fully known;
    // here we only have rtype/class/ttl/data/rrsig, so use the zone root as
    // a placeholder that `ZoneContents` reconstruction overwrites.
    let mut rrset = RRset::new(root_name(), class, rtype, ttl, data);
    if has_rrsig {
        rrset.rrsig = Some(read_rrsig(reader)?);
    }
    Ok(rrset)
}

fn read_rdata<R: Read>(
    reader: &mut R,
    resolve: &impl Fn(NodeId) -> Option<StoredName>,
) -> Result<Rdata, DumpError> {
    let item_count = read_u16(reader)?;
    let mut items = Vec::with_capacity(item_count as usize);
    for _ in 0..item_count {
        items.push(read_rdata_item(reader, resolve)?);
    }
    Ok(Rdata::new(items))
}

fn read_rdata_item<R: Read>(
    reader: &mut R,
    resolve: &impl Fn(NodeId) -> Option<StoredName>,
) -> Result<RdataItem, DumpError> {
    let mut tag = [0u8; 1];
    reader.read_exact(&mut tag)?;
    match tag[0] {
        0x01 => {
            let id = NodeId(read_u64(reader)? as u32);
            let name = resolve(id)
                .ok_or_else(|| DumpError::Malformed("dangling in-zone dname reference".into()))?;
            Ok(RdataItem::Dname(name))
        }
        0x00 => {
            let len = read_u16(reader)? as usize;
            let mut wire = vec![0u8; len];
            reader.read_exact(&mut wire)?;
            let name = StoredName::from_octets(Bytes::from(wire))
                .map_err(|_| DumpError::Malformed("invalid external dname wire form".into()))?;
            let mut presence = [0u8; 1];
            reader.read_exact(&mut presence)?;
            if presence[0] == 1 {
                let _closest_encloser = read_u64(reader)?;
            }
            Ok(RdataItem::Dname(name))
        }
        0x02 => {
            let len = read_u16(reader)? as usize;
            let mut bytes = vec![0u8; len];
            reader.read_exact(&mut bytes)?;
            Ok(RdataItem::Blob(Bytes::from(bytes)))
        }
        0x03 => Ok(RdataItem::Scalar(read_u32(reader)?)),
        other => Err(DumpError::Malformed(format!("unknown rdata item tag {other}"))),
    }
}

fn read_rrsig<R: Read>(reader: &mut R) -> Result<Rrsig, DumpError> {
    let type_covered = Rtype::from_int(read_u16(reader)?);
    let mut buf2 = [0u8; 2];
    reader.read_exact(&mut buf2)?;
    let algorithm = buf2[0];
    let labels = buf2[1];
    let original_ttl = Ttl::from_secs(read_u32(reader)?);
    let expiration = read_u32(reader)?;
    let inception = read_u32(reader)?;
    let key_tag = read_u16(reader)?;

    let signer_len = read_u16(reader)? as usize;
    let mut signer_wire = vec![0u8; signer_len];
    reader.read_exact(&mut signer_wire)?;
    let signer_name = StoredName::from_octets(Bytes::from(signer_wire))
        .map_err(|_| DumpError::Malformed("invalid RRSIG signer name".into()))?;

    let sig_len = read_u16(reader)? as usize;
    let mut signature = vec![0u8; sig_len];
    reader.read_exact(&mut signature)?;

    Ok(Rrsig {
        type_covered,
        algorithm,
        labels,
        original_ttl,
        expiration,
        inception,
        key_tag,
        signer_name,
        signature: Bytes::from(signature),
    })
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16, DumpError> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, DumpError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, DumpError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// The root name, built the same way [`crate::util::name_parent`] builds
/// truncated names, rather than relying on an unverified `Name::root()`
/// constructor.
fn root_name() -> StoredName {
    NameBuilder::<BytesMut>::new()
        .finish()
        .expect("an empty label sequence forms the root name")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeFlags;
    use std::io::Cursor;
    use std::str::FromStr;

    fn sample_contents() -> ZoneContents {
        let apex_name = StoredName::from_str("example.com.").unwrap();
        let mut contents = ZoneContents::new(apex_name.clone());

        let soa_rdata = Rdata::new(vec![
            RdataItem::Dname(apex_name.clone()),
            RdataItem::Dname(apex_name.clone()),
            RdataItem::Scalar(1),
            RdataItem::Scalar(7200),
            RdataItem::Scalar(3600),
            RdataItem::Scalar(1209600),
            RdataItem::Scalar(3600),
        ]);
        let apex_id = contents.apex_id();
        contents.node_mut(apex_id).unwrap().insert_rrset(RRset::new(
            apex_name.clone(),
            Class::IN,
            Rtype::SOA,
            Ttl::from_secs(3600),
            vec![soa_rdata],
        ));

        let www = StoredName::from_str("www.example.com.").unwrap();
        let www_id = contents.get_or_insert(www.clone(), NodeFlags::AUTHORITATIVE);
        contents.node_mut(www_id).unwrap().insert_rrset(RRset::new(
            www,
            Class::IN,
            Rtype::A,
            Ttl::from_secs(300),
            vec![Rdata::new(vec![RdataItem::Scalar(0x0100007f)])],
        ));

        contents
    }

    #[test]
    fn header_roundtrips() {
        let contents = sample_contents();
        let mut buf = Cursor::new(Vec::new());
        write_dump(&mut buf, &contents, "example.com.zone", 1).unwrap();

        buf.set_position(0);
        let header = read_header(&mut buf).unwrap();
        assert_eq!(header.source_filename, "example.com.zone");
        assert_eq!(header.normal_node_count, 2);
        assert_eq!(header.nsec3_node_count, 0);
    }

    #[test]
    fn detects_cname_cohabitation() {
        let mut contents = sample_contents();
        let cname_owner = StoredName::from_str("alias.example.com.").unwrap();
        let id = contents.get_or_insert(cname_owner.clone(), NodeFlags::AUTHORITATIVE);
        let target = StoredName::from_str("www.example.com.").unwrap();
        contents.node_mut(id).unwrap().insert_rrset(RRset::new(
            cname_owner.clone(),
            Class::IN,
            Rtype::CNAME,
            Ttl::from_secs(300),
            vec![Rdata::new(vec![RdataItem::Dname(target)])],
        ));
        contents.node_mut(id).unwrap().insert_rrset(RRset::new(
            cname_owner,
            Class::IN,
            Rtype::A,
            Ttl::from_secs(300),
            vec![Rdata::new(vec![RdataItem::Scalar(1)])],
        ));

        let mut warnings = Vec::new();
        run_semantic_checks(&contents, 1, &mut warnings);
        assert!(warnings.iter().any(|w| w.contains("also carries")));
    }
}
