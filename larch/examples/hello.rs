use anyhow::Result;

use larch::tree::{Side, Store};

fn main() -> Result<()> {
    let path = std::env::temp_dir().join("hello.dat");

    // Start from nothing
    let _ = std::fs::remove_file(&path);
    let mut store = Store::try_open(&path)?;

    // Add 'A' as the root and 'B' as its left child
    let a = store.append('A')?;
    store.link_as_root(a)?;
    let b = store.append('B')?;
    store.link_as_child('A', b, Side::Left)?;

    assert_eq!(store.values()?, vec!['A', 'B']);
    assert!(store.detect_orphans()?.iter().all(|slot| slot.reachable));

    // Close and reopen, the tree is still there
    store.close()?;
    drop(store);
    let mut store = Store::try_open(&path)?;
    assert_eq!(store.values()?, vec!['A', 'B']);

    for line in store.describe()? {
        println!("{line}");
    }

    store.close()?;
    drop(store);
    std::fs::remove_file(&path)?;
    Ok(())
}
