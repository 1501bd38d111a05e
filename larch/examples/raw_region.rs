use anyhow::Result;

use larch::io::MappedRegion;
use larch::tree::Offset;

const GREETING: &[u8] = b"hello, world!";

fn main() -> Result<()> {
    let path = std::env::temp_dir().join("raw_region.dat");
    let _ = std::fs::remove_file(&path);

    // Map a large file, then shrink it to just what we need
    let mut region = MappedRegion::try_open(&path, 1_000_000)?;
    region.resize(32)?;

    region
        .bytes_at_mut(Offset::new(0), GREETING.len())
        .copy_from_slice(GREETING);
    region
        .bytes_at_mut(Offset::new(16), 8)
        .copy_from_slice(&0x6c6f_6c21u64.to_le_bytes());
    region
        .bytes_at_mut(Offset::new(24), 4)
        .copy_from_slice(&u32::from('力').to_le_bytes());
    region.flush()?;
    region.close()?;

    // Read it back without the mapping
    let contents = std::fs::read(&path)?;
    println!("size: {}", contents.len());
    println!("greeting: {}", String::from_utf8_lossy(&contents[..GREETING.len()]));
    println!(
        "number: {:#x}",
        u64::from_le_bytes(contents[16..24].try_into()?)
    );
    let code = u32::from_le_bytes(contents[24..28].try_into()?);
    println!("char: {}", char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));

    std::fs::remove_file(&path)?;
    Ok(())
}
