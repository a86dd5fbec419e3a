use provtrace::tracer::registry::Mode;
use provtrace::tracer::syscalls::{Abi,EntryAction,ExitAction,ForkKind,OpenKind,SyscallTables,
                                  EXECVE_I386,EXECVE_X32,EXECVE_X86_64,X32_SYSCALL_BIT};

#[test]
fn test_open_family_per_abi() {
    let tables = SyscallTables::build();

    let open_i386 = tables.lookup(Abi::I386, 5).unwrap();
    assert_eq!(open_i386.name, "open");
    assert_eq!(open_i386.entry, None);
    assert_eq!(open_i386.exit, Some(ExitAction::FileOpen(OpenKind::Open)));

    let open_x64 = tables.lookup(Abi::X86_64, 2).unwrap();
    assert_eq!(open_x64.name, "open");
    assert_eq!(open_x64.exit, Some(ExitAction::FileOpen(OpenKind::Open)));

    // number 5 means something else entirely on x86-64 (fstat) and is not handled
    assert!(tables.lookup(Abi::X86_64, 5).is_none());
}

#[test]
fn test_execve_has_both_sides() {
    let tables = SyscallTables::build();
    for (abi, number, discriminator) in &[(Abi::I386, 11, EXECVE_I386),
                                          (Abi::X86_64, 59, EXECVE_X86_64),
                                          (Abi::X32, 520, EXECVE_X32)] {
        let entry = tables.lookup(*abi, *number).unwrap();
        assert_eq!(entry.name, "execve");
        assert_eq!(entry.entry, Some(EntryAction::ExecveEnter));
        assert_eq!(entry.exit, Some(ExitAction::ExecveExit { execve_syscall : *discriminator }));
    }
}

#[test]
fn test_socketcall_is_i386_only() {
    let tables = SyscallTables::build();
    assert_eq!(tables.lookup(Abi::I386, 102).unwrap().exit, Some(ExitAction::Socketcall));
    // 102 is getuid on x86-64; we have nothing to say about it
    assert!(tables.lookup(Abi::X86_64, 102).is_none());
}

#[test]
fn test_network_calls_are_direct_on_64_bit() {
    let tables = SyscallTables::build();
    for abi in &[Abi::X86_64, Abi::X32] {
        assert_eq!(tables.lookup(*abi, 42).unwrap().exit, Some(ExitAction::Connect));
        assert_eq!(tables.lookup(*abi, 43).unwrap().exit, Some(ExitAction::Accept));
        assert_eq!(tables.lookup(*abi, 288).unwrap().exit, Some(ExitAction::Accept));
    }
    assert!(tables.lookup(Abi::I386, 42).is_none());
}

#[test]
fn test_at_adapters_point_at_their_plain_calls() {
    let tables = SyscallTables::build();

    // each adapter's discriminator indexes a real exit handler in the same table
    for abi in &[Abi::I386, Abi::X86_64, Abi::X32] {
        let table = tables.table(*abi);
        for number in 0..table.len() as i64 {
            if let Some(entry) = table.lookup(number) {
                if let Some(ExitAction::AtAdapter { real_syscall }) = entry.exit {
                    let target = table.lookup(real_syscall)
                        .unwrap_or_else(|| panic!("{} adapter dangles in {:?}", entry.name, abi));
                    assert!(target.exit.is_some());
                    assert!(!matches!(target.exit, Some(ExitAction::AtAdapter { .. })));
                }
            }
        }
    }

    let openat = tables.lookup(Abi::X86_64, 257).unwrap();
    assert_eq!(openat.exit, Some(ExitAction::AtAdapter { real_syscall : 2 }));
}

#[test]
fn test_fork_family() {
    let tables = SyscallTables::build();
    assert_eq!(tables.lookup(Abi::X86_64, 57).unwrap().exit, Some(ExitAction::Fork(ForkKind::Fork)));
    assert_eq!(tables.lookup(Abi::X86_64, 58).unwrap().exit, Some(ExitAction::Fork(ForkKind::Vfork)));
    assert_eq!(tables.lookup(Abi::X86_64, 56).unwrap().exit, Some(ExitAction::Fork(ForkKind::Clone)));
    assert_eq!(tables.lookup(Abi::I386, 2).unwrap().exit, Some(ExitAction::Fork(ForkKind::Fork)));
}

#[test]
fn test_unmentioned_slots_are_empty() {
    let tables = SyscallTables::build();
    // write(2) is never interpreted
    assert!(tables.lookup(Abi::X86_64, 1).is_none());
    // out-of-range lookups are simply empty
    assert!(tables.lookup(Abi::X86_64, 99999).is_none());
    assert!(tables.lookup(Abi::X86_64, -1).is_none());
}

#[test]
fn test_abi_selection() {
    assert_eq!(Abi::of_task(Mode::I386, 11), Abi::I386);
    assert_eq!(Abi::of_task(Mode::X86_64, 59), Abi::X86_64);
    assert_eq!(Abi::of_task(Mode::X86_64, X32_SYSCALL_BIT + 520), Abi::X32);
    // a 32-bit task never carries the x32 bit
    assert_eq!(Abi::of_task(Mode::I386, X32_SYSCALL_BIT + 520), Abi::I386);
}
