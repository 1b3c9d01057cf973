//! Path resolution over the directory module.

use crate::constants::ROOT_INODE;
use crate::device::BlockDevice;
use crate::dirent::find_in_dir;
use crate::error::FsResult;
use crate::inode::read_inode;

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Resolves `path` to an inode number, starting from root and applying
/// `find_in_dir` at each component. The empty path and `"/"` both resolve
/// to [`ROOT_INODE`]. Returns `Ok(None)` on the first missing component
/// or if an intermediate component is not a directory.
pub fn resolve_path(dev: &dyn BlockDevice, path: &str) -> FsResult<Option<u32>> {
    let mut current = ROOT_INODE;
    for component in components(path) {
        let inode = read_inode(dev, current)?;
        if !inode.is_dir() {
            return Ok(None);
        }
        match find_in_dir(dev, &inode, component.as_bytes())? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Returns the trailing component of `path`, i.e. the name that would be
/// looked up in the parent directory. Empty for `"/"` and the empty path.
pub fn basename(path: &str) -> &str {
    components(path).last().unwrap_or("")
}

/// Resolves the inode of the directory containing the final component of
/// `path` (the prefix up to the last `/`).
pub fn parent_of(dev: &dyn BlockDevice, path: &str) -> FsResult<Option<u32>> {
    let mut comps: Vec<&str> = components(path).collect();
    if comps.is_empty() {
        return Ok(Some(ROOT_INODE));
    }
    comps.pop();
    if comps.is_empty() {
        return Ok(Some(ROOT_INODE));
    }
    let parent_path = format!("/{}", comps.join("/"));
    resolve_path(dev, &parent_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DIR_MODE, REG_MODE};
    use crate::device::FileBlockDevice;
    use crate::dirent::add_dir_entry;
    use crate::inode::{write_inode, INode};
    use crate::superblock::Superblock;

    fn fixture() -> (FileBlockDevice, Superblock) {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = FileBlockDevice::new(dir.path().to_path_buf());
        dev.mount(true).unwrap();
        let sb = Superblock::fresh();
        let root = INode::new(DIR_MODE, (0, 0));
        write_inode(&mut dev, ROOT_INODE, &root).unwrap();
        (dev, sb)
    }

    #[test]
    fn root_and_empty_path_resolve_to_root() {
        let (dev, _sb) = fixture();
        assert_eq!(resolve_path(&dev, "/").unwrap(), Some(ROOT_INODE));
        assert_eq!(resolve_path(&dev, "").unwrap(), Some(ROOT_INODE));
    }

    #[test]
    fn nested_lookup_and_basename() {
        let (mut dev, mut sb) = fixture();
        let mut root = crate::inode::read_inode(&dev, ROOT_INODE).unwrap();
        let sub = INode::new(DIR_MODE, (0, 0));
        write_inode(&mut dev, 1, &sub).unwrap();
        add_dir_entry(&mut dev, &mut sb, &mut root, b"a", 1, (0, 0)).unwrap();
        write_inode(&mut dev, ROOT_INODE, &root).unwrap();

        let mut sub_loaded = crate::inode::read_inode(&dev, 1).unwrap();
        let file = INode::new(REG_MODE, (0, 0));
        write_inode(&mut dev, 2, &file).unwrap();
        add_dir_entry(&mut dev, &mut sb, &mut sub_loaded, b"f", 2, (0, 0)).unwrap();
        write_inode(&mut dev, 1, &sub_loaded).unwrap();

        assert_eq!(resolve_path(&dev, "/a/f").unwrap(), Some(2));
        assert_eq!(basename("/a/f"), "f");
        assert_eq!(parent_of(&dev, "/a/f").unwrap(), Some(1));
    }

    #[test]
    fn missing_component_resolves_to_none() {
        let (dev, _sb) = fixture();
        assert_eq!(resolve_path(&dev, "/nope").unwrap(), None);
    }
}
