use std::path::PathBuf;

use base::defs::Result;
use base::util::fs;

/// Source of the bundled capture assets (template mesh and mask
/// images). Callers inject whatever lookup their packaging uses.
pub trait AssetProvider {
    fn load(&self, name: &str) -> Result<Vec<u8>>;
}

/// Assets laid out as plain files under a root directory.
pub struct DirAssets {
    root: PathBuf,
}

impl DirAssets {
    pub fn new<P: Into<PathBuf>>(root: P) -> DirAssets {
        DirAssets { root: root.into() }
    }
}

impl AssetProvider for DirAssets {
    fn load(&self, name: &str) -> Result<Vec<u8>> {
        fs::read_file(&self.root.join(name))
    }
}

#[cfg(test)]
pub mod testing {
    use std::cell::RefCell;

    use base::util::test::MethodMock;

    use super::*;

    pub struct MockAssets {
        pub load_mock: RefCell<MethodMock<String, Result<Vec<u8>>>>,
    }

    impl MockAssets {
        pub fn new() -> MockAssets {
            MockAssets {
                load_mock: RefCell::new(MethodMock::new()),
            }
        }
    }

    impl AssetProvider for MockAssets {
        fn load(&self, name: &str) -> Result<Vec<u8>> {
            self.load_mock.borrow_mut().call(name.to_string())
        }
    }
}
