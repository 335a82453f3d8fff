#![forbid(unsafe_code)]

use e2w::{InodeNumber, OpenImage, OpenOptions, ScanPolicy};
use e2w_harness::{ImageBuilder, demo_image};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// One node to add to the tree: name, whether it is a directory, and a
/// selector picking its parent among the directories created so far.
type NodePlan = (String, bool, usize);

struct Built {
    image: Vec<u8>,
    /// Every created path with its inode number.
    paths: BTreeMap<String, InodeNumber>,
}

fn build_tree(block_size: u32, nodes: &[NodePlan]) -> Built {
    let mut builder = ImageBuilder::new(block_size).inodes_count(64);
    let mut dirs: Vec<(String, InodeNumber)> = vec![(String::new(), InodeNumber::ROOT)];
    let mut paths = BTreeMap::new();

    for (name, is_dir, selector) in nodes {
        let (parent_path, parent) = dirs[selector % dirs.len()].clone();
        let path = format!("{parent_path}/{name}");
        if paths.contains_key(&path) {
            continue;
        }
        let ino = if *is_dir {
            let ino = builder.mkdir(parent, name).expect("mkdir");
            dirs.push((path.clone(), ino));
            ino
        } else {
            builder
                .create_file(parent, name, name.as_bytes())
                .expect("create_file")
        };
        paths.insert(path, ino);
    }

    Built {
        image: builder.build().expect("build image"),
        paths,
    }
}

/// Resolve `path` by listing directories and matching names by hand.
fn manual_walk(fs: &OpenImage<'_>, path: &str) -> Option<InodeNumber> {
    let mut current = InodeNumber::ROOT;
    for component in path.split('/').filter(|c| !c.is_empty()) {
        let inode = fs.read_inode(current).expect("read inode");
        if !inode.is_dir() {
            return None;
        }
        let entries = fs.list_dir(current).expect("list dir");
        current = entries
            .iter()
            .find(|e| e.name == component.as_bytes())
            .map(|e| e.inode_number())?;
    }
    (!current.is_root()).then_some(current)
}

const DEMO_PATHS: [&str; 8] = [
    "/",
    "/etc",
    "/etc/passwd",
    "/docs/guide.txt",
    "/docs/draft.txt",
    "/readme.txt",
    "/link/x",
    "/docs/../etc/passwd",
];

fn node_strategy() -> impl Strategy<Value = NodePlan> {
    ("[a-z]{1,6}", any::<bool>(), 0_usize..16)
}

fn block_size_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![Just(1024_u32), Just(2048), Just(4096)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn created_paths_resolve_to_their_inodes(
        block_size in block_size_strategy(),
        nodes in proptest::collection::vec(node_strategy(), 1..24),
    ) {
        let built = build_tree(block_size, &nodes);
        let fs = OpenImage::open(&built.image).unwrap();
        for (path, ino) in &built.paths {
            prop_assert_eq!(fs.resolve(path).unwrap(), Some(*ino), "path {}", path);
            let with_slashes = format!("/{}/", path.replace('/', "//"));
            prop_assert_eq!(fs.resolve(&with_slashes).unwrap(), Some(*ino));
        }
    }

    #[test]
    fn resolve_matches_manual_walk(
        block_size in block_size_strategy(),
        nodes in proptest::collection::vec(node_strategy(), 1..24),
        queries in proptest::collection::vec(
            proptest::collection::vec(prop_oneof!["[a-z]{1,6}", Just(String::from("..")), Just(String::from("."))], 0..5),
            1..16,
        ),
    ) {
        let built = build_tree(block_size, &nodes);
        let fs = OpenImage::open(&built.image).unwrap();
        let created: Vec<&String> = built.paths.keys().collect();
        for (i, components) in queries.iter().enumerate() {
            // Mix random queries with queries rooted at a created path.
            let prefix = if i % 2 == 0 { created[i % created.len()].as_str() } else { "" };
            let path = format!("{prefix}/{}", components.join("/"));
            prop_assert_eq!(fs.resolve(&path).unwrap(), manual_walk(&fs, &path), "path {}", path);
        }
    }

    #[test]
    fn resolve_is_idempotent(
        nodes in proptest::collection::vec(node_strategy(), 1..16),
        query in "(/[a-z.]{1,4}){0,4}",
    ) {
        let built = build_tree(1024, &nodes);
        let fs = OpenImage::open(&built.image).unwrap();
        let first = fs.resolve(&query).unwrap();
        let second = fs.resolve(&query).unwrap();
        prop_assert_eq!(first, second);
        prop_assert_eq!(e2w::resolve(&built.image, &query).unwrap(), first);
    }

    #[test]
    fn damaged_images_fail_without_panicking(
        block_size in prop_oneof![Just(1024_u32), Just(4096)],
        mutations in proptest::collection::vec(
            (any::<prop::sample::Index>(), any::<u8>()),
            1..40,
        ),
        skip_validation in any::<bool>(),
        last_match in any::<bool>(),
    ) {
        let (mut image, _) = demo_image(block_size).unwrap();
        for (index, byte) in &mutations {
            let at = index.index(image.len());
            image[at] = *byte;
        }
        let opts = OpenOptions {
            skip_validation,
            scan_policy: if last_match {
                ScanPolicy::LastMatch
            } else {
                ScanPolicy::FirstMatch
            },
        };

        // Any outcome is fine as long as it is a value, not a panic.
        if let Ok(fs) = OpenImage::open_with_options(&image, &opts) {
            let _ = fs.first_group_descriptor();
            let _ = fs.list_dir(InodeNumber::ROOT);
            for path in DEMO_PATHS {
                let _ = fs.stat(path);
                if let Ok(Some(ino)) = fs.resolve(path) {
                    let _ = fs.list_dir(ino);
                }
            }
        }
        for path in DEMO_PATHS {
            let _ = e2w::resolve_with_options(&image, path, &opts);
        }
    }
}
