//! Recursive walk for transports that only offer one-level listings.

use crate::{join_remote, Entry, Result, Walk, WalkEntry};

/// Depth-first walk of `root` built from repeated calls to `list`.
///
/// Yields `root` first, then every descendant in pre-order with siblings
/// sorted by name, matching [`crate::MountedFs`]. A directory whose listing
/// fails yields one error in its place and is not descended into.
pub fn walk_listing<'a, F>(root: &str, list: F) -> Walk<'a>
where
    F: Fn(&str) -> Result<Vec<Entry>> + 'a,
{
    Box::new(ListingWalk {
        list,
        stack: vec![WalkEntry {
            path: join_remote(root, ""),
            is_dir: true,
            size: 0,
        }],
    })
}

struct ListingWalk<F> {
    list: F,
    stack: Vec<WalkEntry>,
}

impl<F> Iterator for ListingWalk<F>
where
    F: Fn(&str) -> Result<Vec<Entry>>,
{
    type Item = Result<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = self.stack.pop()?;
        if !step.is_dir {
            return Some(Ok(step));
        }

        let mut children = match (self.list)(&step.path) {
            Ok(children) => children,
            Err(e) => return Some(Err(e)),
        };
        children.sort_by(|a, b| b.name.cmp(&a.name));
        self.stack.extend(children.into_iter().map(|child| WalkEntry {
            path: join_remote(&step.path, &child.name),
            is_dir: child.is_dir,
            size: child.size,
        }));
        Some(Ok(step))
    }
}
