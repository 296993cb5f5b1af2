//! Optional Linux `perf` sidecar: one line per compiled block in
//! `/tmp/perf-<pid>.map` so profilers can symbolize JIT frames.

#[cfg(feature = "perf-map")]
mod imp {
    use std::fs::File;
    use std::io::Write;

    use log::warn;

    pub struct PerfMap {
        file: Option<File>,
        attempted: bool,
    }

    impl PerfMap {
        pub fn new() -> PerfMap {
            PerfMap {
                file: None,
                attempted: false,
            }
        }

        fn open(&mut self) {
            if self.attempted {
                return;
            }
            self.attempted = true;
            if std::env::var_os("PERF_BUILDID_DIR").is_none() {
                return;
            }
            let path = format!("/tmp/perf-{}.map", std::process::id());
            match File::create(&path) {
                Ok(file) => self.file = Some(file),
                Err(err) => warn!("failed to open {path}: {err}"),
            }
        }

        pub fn register(&mut self, entrypoint: u64, size: usize, name: &str) {
            self.open();
            if let Some(file) = &mut self.file {
                let line = format!("{entrypoint:016x} {size:016x} {name}\n");
                if let Err(err) = file.write_all(line.as_bytes()) {
                    warn!("perf map write failed: {err}");
                    self.file = None;
                }
            }
        }

        pub fn clear(&mut self) {
            if self.file.take().is_some() {
                self.attempted = false;
                self.open();
            }
        }
    }
}

#[cfg(not(feature = "perf-map"))]
mod imp {
    pub struct PerfMap;

    impl PerfMap {
        pub fn new() -> PerfMap {
            PerfMap
        }

        pub fn register(&mut self, _entrypoint: u64, _size: usize, _name: &str) {}

        pub fn clear(&mut self) {}
    }
}

pub use imp::PerfMap;
