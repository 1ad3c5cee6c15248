//! Adaptive Huffman coder
//!
//! The first byte of a stream selects the table of initial byte weights.
//! Besides one leaf per weighted byte the tree holds two control symbols:
//! [`END_OF_STREAM`] terminates the data and [`NEW_SYMBOL`] is followed by
//! eight raw bits naming a byte that has no leaf yet.
//!
//! All nodes live in one list ordered by descending weight. Siblings are
//! adjacent with the heavier one first, so a node only records its lighter
//! child. Decoding starts at the front of the list (the root) and a set bit
//! picks the heavier child. Whenever a weight grows, the node trades places
//! with the first node of its old weight so the list stays ordered.
//!
//! Table 0 is adaptive: every coded byte gains weight. Other tables only
//! adjust the tree when a new byte is added.

use crate::error::{ArchiveError, ArchiveResult};

/// Symbol that ends a stream
pub const END_OF_STREAM: u16 = 0x100;

/// Symbol announcing a byte that has no leaf yet
pub const NEW_SYMBOL: u16 = 0x101;

/// Weight table used when writing
pub const DEFAULT_TABLE: u8 = 0;

const SYMBOL_COUNT: usize = 0x102;

/// Node capacity of a freshly built tree with every byte present
const INITIAL_NODES: usize = 0x203;

/// Table 0: the 16 lowest byte values weigh more than the rest
const WEIGHTS_0: [u8; 256] = {
    let mut weights = [0x02; 256];
    let mut byte = 0;
    while byte < 0x10 {
        weights[byte] = 0x0A;
        byte += 1;
    }
    weights
};

fn weight_table(table: u8) -> ArchiveResult<&'static [u8; 256]> {
    match table & 0x0F {
        0 => Ok(&WEIGHTS_0),
        other => Err(ArchiveError::Unsupported(format!(
            "huffman weight table {other}"
        ))),
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    symbol: u16,
    weight: u32,
    parent: Option<usize>,
    /// Lighter child; the heavier one sits right before it in the list
    child_lo: Option<usize>,
}

#[derive(Debug)]
struct Tree {
    nodes: Vec<Node>,
    /// Node ids by descending weight
    order: Vec<usize>,
    /// Index of every node in `order`
    position: Vec<usize>,
    leaves: [Option<usize>; SYMBOL_COUNT],
    adaptive: bool,
}

impl Tree {
    fn new(table: u8) -> ArchiveResult<Self> {
        let weights = weight_table(table)?;
        let mut tree = Self {
            nodes: Vec::with_capacity(INITIAL_NODES),
            order: Vec::with_capacity(INITIAL_NODES),
            position: Vec::with_capacity(INITIAL_NODES),
            leaves: [None; SYMBOL_COUNT],
            adaptive: table == 0,
        };

        for (byte, &weight) in weights.iter().enumerate() {
            if weight == 0 {
                continue;
            }
            let weight = u32::from(weight);
            let at = tree.insert_point(weight);
            let leaf = tree.insert(byte as u16, weight, at);
            tree.leaves[byte] = Some(leaf);
        }
        for symbol in [END_OF_STREAM, NEW_SYMBOL] {
            let leaf = tree.insert(symbol, 1, tree.order.len());
            tree.leaves[usize::from(symbol)] = Some(leaf);
        }

        // Join neighbours from the light end until one root remains
        let mut lo_at = tree.order.len() - 1;
        while lo_at > 0 {
            let lo = tree.order[lo_at];
            let hi = tree.order[lo_at - 1];
            let weight = tree.nodes[lo].weight + tree.nodes[hi].weight;
            let at = tree.insert_point(weight);
            let parent = tree.insert(0, weight, at);
            tree.nodes[parent].child_lo = Some(lo);
            tree.nodes[lo].parent = Some(parent);
            tree.nodes[hi].parent = Some(parent);
            lo_at = tree.position[hi].saturating_sub(1);
        }
        Ok(tree)
    }

    /// Index after every node of at least `weight`
    fn insert_point(&self, weight: u32) -> usize {
        self.order
            .partition_point(|&node| self.nodes[node].weight >= weight)
    }

    fn insert(&mut self, symbol: u16, weight: u32, at: usize) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            symbol,
            weight,
            parent: None,
            child_lo: None,
        });
        self.order.insert(at, id);
        self.position.push(at);
        for (index, &node) in self.order.iter().enumerate().skip(at) {
            self.position[node] = index;
        }
        id
    }

    fn leaf(&self, symbol: u16) -> Option<usize> {
        self.leaves[usize::from(symbol)]
    }

    fn child_hi(&self, child_lo: usize) -> usize {
        self.order[self.position[child_lo] - 1]
    }

    fn decode(&self, bits: &mut BitReader<'_>) -> ArchiveResult<u16> {
        let mut node = self.order[0];
        while let Some(lo) = self.nodes[node].child_lo {
            node = if bits.bit()? { self.child_hi(lo) } else { lo };
        }
        Ok(self.nodes[node].symbol)
    }

    fn encode(&self, leaf: usize, writer: &mut BitWriter) {
        let mut path = Vec::new();
        let mut node = leaf;
        while let Some(parent) = self.nodes[node].parent {
            path.push(self.nodes[parent].child_lo != Some(node));
            node = parent;
        }
        for &bit in path.iter().rev() {
            writer.push_bit(bit);
        }
    }

    fn encode_new_symbol(&mut self, byte: u8, writer: &mut BitWriter) {
        if let Some(escape) = self.leaf(NEW_SYMBOL) {
            self.encode(escape, writer);
        }
        writer.push_byte(byte);
        self.add_symbol(byte);
        self.increment_symbol(u16::from(byte));
    }

    /// Split the lightest leaf into a copy of itself and a new zero-weight leaf
    fn add_symbol(&mut self, byte: u8) {
        let Some(&last) = self.order.last() else {
            return;
        };
        let Node { symbol, weight, .. } = self.nodes[last];
        let end = self.order.len();
        let hi = self.insert(symbol, weight, end);
        let lo = self.insert(u16::from(byte), 0, end + 1);

        self.nodes[hi].parent = Some(last);
        self.nodes[lo].parent = Some(last);
        self.nodes[last].child_lo = Some(lo);
        self.leaves[usize::from(symbol)] = Some(hi);
        self.leaves[usize::from(byte)] = Some(lo);

        self.increment(lo);
    }

    fn increment_symbol(&mut self, symbol: u16) {
        if let Some(leaf) = self.leaf(symbol) {
            self.increment(leaf);
        }
    }

    fn increment(&mut self, leaf: usize) {
        let mut current = Some(leaf);
        while let Some(node) = current {
            self.nodes[node].weight += 1;
            let weight = self.nodes[node].weight;

            let at = self.position[node];
            let mut leader = at;
            while leader > 0 && self.nodes[self.order[leader - 1]].weight < weight {
                leader -= 1;
            }
            if leader != at {
                self.swap(node, self.order[leader]);
            }
            current = self.nodes[node].parent;
        }
    }

    /// Exchange two subtrees, both in the list and under their parents
    fn swap(&mut self, a: usize, b: usize) {
        let parent_a = self.nodes[a].parent;
        let parent_b = self.nodes[b].parent;
        let a_is_lo = parent_a.is_some_and(|parent| self.nodes[parent].child_lo == Some(a));
        let b_is_lo = parent_b.is_some_and(|parent| self.nodes[parent].child_lo == Some(b));

        if let Some(parent) = parent_a
            && a_is_lo
        {
            self.nodes[parent].child_lo = Some(b);
        }
        if let Some(parent) = parent_b
            && b_is_lo
        {
            self.nodes[parent].child_lo = Some(a);
        }
        self.nodes[a].parent = parent_b;
        self.nodes[b].parent = parent_a;

        let (at_a, at_b) = (self.position[a], self.position[b]);
        self.order.swap(at_a, at_b);
        self.position[a] = at_b;
        self.position[b] = at_a;
    }
}

/// LSB-first bit reader
struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn bit(&mut self) -> ArchiveResult<bool> {
        let byte = self.data.get(self.position / 8).ok_or_else(|| {
            ArchiveError::Decompression(
                "huffman: stream ended without an end marker".to_string(),
            )
        })?;
        let bit = (byte >> (self.position % 8)) & 1 != 0;
        self.position += 1;
        Ok(bit)
    }

    fn byte(&mut self) -> ArchiveResult<u8> {
        let mut value = 0u8;
        for shift in 0..8 {
            value |= u8::from(self.bit()?) << shift;
        }
        Ok(value)
    }
}

/// LSB-first bit writer
#[derive(Debug, Default)]
struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    fn push_bit(&mut self, bit: bool) {
        if self.bits % 8 == 0 {
            self.bytes.push(0);
        }
        if bit && let Some(last) = self.bytes.last_mut() {
            *last |= 1 << (self.bits % 8);
        }
        self.bits += 1;
    }

    fn push_byte(&mut self, byte: u8) {
        for shift in 0..8 {
            self.push_bit((byte >> shift) & 1 != 0);
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Decode a Huffman stream into at most `expected` bytes
pub fn decompress(data: &[u8], expected: usize) -> ArchiveResult<Vec<u8>> {
    let (&table, stream) = data
        .split_first()
        .ok_or_else(|| ArchiveError::Decompression("huffman: empty stream".to_string()))?;
    let mut tree = Tree::new(table)?;
    let mut bits = BitReader::new(stream);
    let mut output = Vec::with_capacity(expected);

    loop {
        let byte = match tree.decode(&mut bits)? {
            END_OF_STREAM => break,
            NEW_SYMBOL => {
                let byte = bits.byte()?;
                tree.add_symbol(byte);
                if !tree.adaptive {
                    tree.increment_symbol(u16::from(byte));
                }
                byte
            }
            symbol => symbol as u8,
        };

        if output.len() >= expected {
            break;
        }
        output.push(byte);
        if tree.adaptive {
            tree.increment_symbol(u16::from(byte));
        }
    }

    Ok(output)
}

/// Encode `data` starting from weight table `table`
pub fn compress(data: &[u8], table: u8) -> ArchiveResult<Vec<u8>> {
    let mut tree = Tree::new(table)?;
    let mut writer = BitWriter::default();
    writer.push_byte(table);

    for &byte in data {
        match tree.leaf(u16::from(byte)) {
            Some(leaf) => {
                tree.encode(leaf, &mut writer);
                if tree.adaptive {
                    tree.increment(leaf);
                }
            }
            None => tree.encode_new_symbol(byte, &mut writer),
        }
    }
    if let Some(end) = tree.leaf(END_OF_STREAM) {
        tree.encode(end, &mut writer);
    }
    Ok(writer.into_bytes())
}
