//! Boot-time self-test harness
//!
//! Runs each subsystem's `self_test` and reports totals over serial.
//! Enabled by the RUN_SELF_TESTS switch in main.rs; meant for QEMU runs,
//! not production boots.

pub fn run_all() {
    crate::serial_println!("[SELFTEST] ---- begin ----");

    let mut passed = 0usize;
    let mut failed = 0usize;

    let suites: [(&str, fn() -> (usize, usize)); 4] = [
        ("pmm", crate::memory::pmm::self_test),
        ("vmm", crate::memory::vmm::self_test),
        ("pipe", crate::pipe::self_test),
        ("elf", crate::elf::self_test),
    ];

    for (name, suite) in suites {
        let (p, f) = suite();
        crate::serial_println!("[SELFTEST] {}: {} passed, {} failed", name, p, f);
        passed += p;
        failed += f;
    }

    // FAT32 name conversion runs only when a volume is mounted (it does
    // not touch the disk, but keeps output grouped with the others)
    let (p, f) = crate::vfs::fat32::self_test();
    crate::serial_println!("[SELFTEST] fat32: {} passed, {} failed", p, f);
    passed += p;
    failed += f;

    if failed == 0 {
        crate::serial_println!("[SELFTEST] ---- all {} checks passed ----", passed);
    } else {
        crate::serial_println!(
            "[SELFTEST] ---- {} passed, {} FAILED ----",
            passed,
            failed
        );
    }
}
