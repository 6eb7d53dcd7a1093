//! Layered filesystem example
//!
//! Builds a small sandbox the way an embedder would: a read-only image,
//! a per-session scratch layer, and a namespace that mounts both.
//! Run with: cargo run --example layered

use std::path::Path;
use std::sync::Arc;

use stratafs::fs::util::{self, WalkControl};
use stratafs::{
    BasePathFs, CopyOnWriteFs, Fs, Linker, MemFs, MemLimits, MountableFs, ReadOnlyFs, Root,
    resolve_symlinks,
};

fn main() -> anyhow::Result<()> {
    println!("=== Image ===\n");
    let image = build_image()?;
    print_tree(image.as_ref(), Path::new("/"))?;

    println!("\n=== Session namespace ===\n");
    let session = session_namespace(image.clone())?;
    print_tree(&session, Path::new("/"))?;

    println!("\n=== Copy-on-write ===\n");
    util::write_file(&session, Path::new("/app/config.toml"), b"debug = true\n", 0o644)?;
    let seen = util::read_file(&session, Path::new("/app/config.toml"))?;
    let pristine = util::read_file(image.as_ref(), Path::new("/srv/app/config.toml"))?;
    println!("session sees: {}", String::from_utf8_lossy(&seen).trim());
    println!("image keeps:  {}", String::from_utf8_lossy(&pristine).trim());

    println!("\n=== Cross-mount rename ===\n");
    match session.rename(Path::new("/app/config.toml"), Path::new("/tmp/config.toml")) {
        Ok(()) => println!("unexpectedly renamed"),
        Err(e) => println!("refused: {e}"),
    }

    println!("\n=== Symlinks ===\n");
    session.symlink(Path::new("/app/static"), Path::new("/tmp/www"))?;
    let resolved = resolve_symlinks(&session, Path::new("/tmp/www/index.html"))?;
    println!("/tmp/www/index.html -> {}", resolved.display());

    println!("\n=== Root handle ===\n");
    let root = Root::open(image.clone(), "/srv")?;
    println!("stat app/config.toml: {} bytes", root.stat("app/config.toml")?.size);
    if let Err(e) = root.stat("../etc/shadow") {
        println!("escape refused: {e}");
    }
    root.close()?;

    Ok(())
}

fn build_image() -> anyhow::Result<Arc<MemFs>> {
    let image = Arc::new(MemFs::with_limits(MemLimits::new().max_total_bytes(1 << 20)));
    util::write_file(image.as_ref(), Path::new("/srv/app/config.toml"), b"debug = false\n", 0o644)?;
    util::write_file(image.as_ref(), Path::new("/srv/app/static/index.html"), b"<h1>hi</h1>", 0o644)?;
    util::write_file(image.as_ref(), Path::new("/etc/shadow"), b"root:*", 0o600)?;
    println!("image usage: {:?}", image.usage());
    Ok(image)
}

fn session_namespace(image: Arc<MemFs>) -> anyhow::Result<MountableFs> {
    let app = Arc::new(BasePathFs::new(image, "/srv/app"));
    let base = Arc::new(ReadOnlyFs::new(app));
    let overlay = CopyOnWriteFs::new(base, Arc::new(MemFs::new()));

    let mut ns = MountableFs::new(Arc::new(MemFs::new()));
    ns.mount("/app", Arc::new(overlay))?;
    ns.mount("/tmp", Arc::new(MemFs::new()))?;
    println!("mounts: {:?}", ns.mounts());
    Ok(ns)
}

fn print_tree(fs: &dyn Fs, root: &Path) -> anyhow::Result<()> {
    util::walk(fs, root, |path, info| {
        let kind = if info.is_dir() { "d" } else { "-" };
        println!("{kind} {:o} {:>6} {}", info.mode, info.size, path.display());
        Ok(WalkControl::Continue)
    })?;
    Ok(())
}
