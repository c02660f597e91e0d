use crate::error::{Result, SearchError};
use crate::tree::Tree;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use phylotree::tree::Tree as PhyloTree;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, warn};

fn is_gz(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

/// Whole file as text, gunzipped when the path ends with `.gz`.
fn read_text(path: &Path) -> Result<String> {
    if is_gz(path) {
        let mut text = String::new();
        GzDecoder::new(File::open(path)?).read_to_string(&mut text)?;
        Ok(text)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

/// Strip BEAST annotations from Newick strings.
///
/// BEAST writes comments like `:[&rate=0.123]2.45` or a leading `[&R]`.
/// The `[&...]` blocks are removed and everything else is kept.
fn strip_beast_annotations(newick: &str) -> String {
    let mut result = String::with_capacity(newick.len());
    let mut in_annotation = false;
    let mut chars = newick.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '[' && chars.peek() == Some(&'&') {
            in_annotation = true;
        } else if ch == ']' && in_annotation {
            in_annotation = false;
        } else if !in_annotation {
            result.push(ch);
        }
    }

    result
}

fn is_nexus(content: &str) -> bool {
    content
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("#NEXUS"))
}

struct TreeBlock<'a> {
    header: &'a str,
    body: String,
}

fn collect_tree_blocks(content: &str) -> Vec<TreeBlock<'_>> {
    content
        .lines()
        .skip_while(|line| !line.trim_start().to_ascii_uppercase().starts_with("TREE "))
        .take_while(|line| !line.trim().to_ascii_uppercase().starts_with("END;"))
        .filter_map(|line| {
            let (header, body) = line.split_once('=')?;
            Some(TreeBlock { header: header.trim(), body: body.trim().to_string() })
        })
        .collect()
}

fn parse_taxon_block(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .skip_while(|line| !line.trim().to_ascii_uppercase().starts_with("TRANSLATE"))
        .skip(1)
        .take_while(|line| !line.trim().starts_with(';'))
        // 1 '1959.M.CD.59.ZR59',
        // 2 Homo_sapiens;
        .filter_map(|line| {
            let line = line.trim().trim_end_matches([',', ';']);
            let mut parts = line.split_whitespace();
            let id = parts.next()?.to_string();
            let label = parts.next()?.trim_matches('\'').to_string();
            Some((id, label))
        })
        .collect()
}

/// Replace translated leaf ids by their labels; unmapped names are kept.
pub fn rename_leaf_nodes(phylo_tree: &mut PhyloTree, translate: &HashMap<String, String>) {
    for leaf_id in phylo_tree.get_leaves() {
        if let Ok(node) = phylo_tree.get_mut(&leaf_id) {
            if let Some(label) = node.name.as_ref().and_then(|n| translate.get(n)) {
                node.name = Some(label.clone());
            }
        }
    }
}

/// Split text into `;`-terminated Newick statements.
///
/// Semicolons inside `[...]` comments or quoted labels do not terminate a
/// statement. A trailing statement without `;` is kept.
pub fn split_newick_statements(content: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quoted = false;
    for ch in content.chars() {
        match ch {
            '\'' => quoted = !quoted,
            '[' if !quoted => depth += 1,
            ']' if !quoted => depth = depth.saturating_sub(1),
            _ => {}
        }
        current.push(ch);
        if ch == ';' && depth == 0 && !quoted {
            let statement = current.trim();
            if statement.len() > 1 {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        statements.push(format!("{rest};"));
    }
    statements
}

fn parse_statement(path: &Path, idx: usize, newick: &str) -> Result<PhyloTree> {
    PhyloTree::from_newick(newick.trim()).map_err(|e| {
        SearchError::InvalidNewick(format!("{} tree {}: {}", path.display(), idx, e))
    })
}

/// Read reference trees from a NEXUS/BEAST file or a plain Newick file.
///
/// NEXUS input is recognised by its `#NEXUS` header: trees come from the
/// `TREE name = ...;` lines and leaf ids are translated through the
/// `TRANSLATE` block when one is present. Otherwise every `;`-terminated
/// statement is one tree. Files ending in `.gz` are decompressed.
///
/// # Errors
/// `Io` when the file cannot be read, `InvalidNewick` for the first tree
/// that does not parse, and `NoTrees` when the file holds none.
pub fn read_reference_trees<P: AsRef<Path>>(path: P) -> Result<Vec<PhyloTree>> {
    let path = path.as_ref();
    let content = read_text(path)?;

    let trees = if is_nexus(&content) {
        let taxons = parse_taxon_block(&content);
        collect_tree_blocks(&content)
            .into_iter()
            .enumerate()
            .map(|(idx, block)| {
                let newick = strip_beast_annotations(&block.body);
                let mut tree = parse_statement(path, idx, &newick)?;
                if !taxons.is_empty() {
                    rename_leaf_nodes(&mut tree, &taxons);
                }
                debug!(tree = block.header, "read NEXUS tree");
                Ok(tree)
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        split_newick_statements(&content)
            .iter()
            .enumerate()
            .map(|(idx, s)| parse_statement(path, idx, &strip_beast_annotations(s)))
            .collect::<Result<Vec<_>>>()?
    };

    if trees.is_empty() {
        return Err(SearchError::NoTrees(path.display().to_string()));
    }
    debug!(path = %path.display(), count = trees.len(), "read reference trees");
    Ok(trees)
}

/// Reference trees of several files, in order.
pub fn read_reference_tree_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<PhyloTree>> {
    let mut trees = Vec::new();
    for path in paths {
        trees.extend(read_reference_trees(path)?);
    }
    Ok(trees)
}

/// First tree of a file, converted to the search representation.
pub fn read_start_tree<P: AsRef<Path>>(path: P) -> Result<Tree> {
    let path = path.as_ref();
    let trees = read_reference_trees(path)?;
    if trees.len() > 1 {
        warn!(path = %path.display(), count = trees.len(), "using the first of several start trees");
    }
    match trees.first() {
        Some(first) => Tree::from_phylo(first),
        None => Err(SearchError::NoTrees(path.display().to_string())),
    }
}

/// Write trees as Newick, one per line.
/// If `path` ends with `.gz`, the output is gzip-compressed.
/// If `path` equals `-`, the trees are written to stdout.
pub fn write_newick<P: AsRef<Path>>(path: P, trees: &[Tree]) -> Result<()> {
    let p = path.as_ref();
    let mut out: Box<dyn Write> = if p.as_os_str() == "-" {
        Box::new(BufWriter::new(io::stdout().lock()))
    } else if is_gz(p) {
        let f = File::create(p)?;
        Box::new(BufWriter::new(GzEncoder::new(f, Compression::default())))
    } else {
        Box::new(BufWriter::new(File::create(p)?))
    };

    for tree in trees {
        writeln!(&mut out, "{}", tree.to_newick())?;
    }
    out.flush()?;
    Ok(())
}
