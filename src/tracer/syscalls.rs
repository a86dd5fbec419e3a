use crate::tracer::registry::Mode;

/// Syscall numbers at or above this are rejected outright as garbage.
pub const SYSCALL_LIMIT : i64 = 2000;

/// Bit set in the syscall number when a 64-bit task makes an x32 call.
pub const X32_SYSCALL_BIT : i64 = 0x40000000;

pub const EXECVE_I386 : i64 = 11;
pub const EXECVE_X86_64 : i64 = 59;
pub const EXECVE_X32 : i64 = X32_SYSCALL_BIT + 520;

/// The numbering convention a syscall was issued under.
#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum Abi {
    I386,
    X86_64,
    X32
}

impl Abi {
    /// Which table to consult for a task, given its mode and the raw
    /// (unstripped) syscall number it issued.
    pub fn of_task(mode : Mode, raw_syscall : i64) -> Abi {
        if mode == Mode::I386 {
            Abi::I386
        } else if raw_syscall & X32_SYSCALL_BIT != 0 {
            Abi::X32
        } else {
            Abi::X86_64
        }
    }
}

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum OpenKind {
    Open,
    Creat,
    Access
}

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum ForkKind {
    Fork,
    Vfork,
    Clone
}

/// Entry-side handler selectors.
#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum EntryAction {
    ExecveEnter
}

/// Exit-side handler selectors.
///
/// `ExecveExit` carries the raw execve number of its own table so that the
/// originator of a cross-thread exec can be recognised; `AtAdapter` carries
/// the number of the non-`at` call it forwards to in the same table.
#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum ExitAction {
    FileOpen(OpenKind),
    FileStat,
    Readlink,
    Mkdir,
    Symlink { at : bool },
    Chdir,
    ExecveExit { execve_syscall : i64 },
    Fork(ForkKind),
    Socketcall,
    Accept,
    Connect,
    AtAdapter { real_syscall : i64 },
    UnhandledPath1,
    UnhandledOther
}

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub struct SyscallEntry {
    pub name : &'static str,
    pub entry : Option<EntryAction>,
    pub exit : Option<ExitAction>
}

type RawTableEntry = (i64, &'static str, Option<EntryAction>, Option<ExitAction>);

/// One per-ABI dispatch table, indexed by (stripped) syscall number.
///
/// The table is sparse: slots for calls we have nothing to say about carry
/// no entry at all.
pub struct SyscallTable {
    slots : Vec<Option<SyscallEntry>>
}

impl SyscallTable {
    fn build(entries : &[RawTableEntry]) -> SyscallTable {
        let length = entries.iter().map(|entry| entry.0 + 1).max().unwrap_or(0) as usize;
        let mut slots = vec![None; length];
        for &(number, name, entry, exit) in entries {
            slots[number as usize] = Some(SyscallEntry { name, entry, exit });
        }
        SyscallTable { slots }
    }

    pub fn lookup(&self, syscall : i64) -> Option<SyscallEntry> {
        if syscall < 0 || syscall as usize >= self.slots.len() {
            None
        } else {
            self.slots[syscall as usize]
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

/// The three dispatch tables, built once at startup and shared read-only.
pub struct SyscallTables {
    i386 : SyscallTable,
    x86_64 : SyscallTable,
    x32 : SyscallTable
}

impl SyscallTables {
    pub fn table(&self, abi : Abi) -> &SyscallTable {
        match abi {
            Abi::I386 => { &self.i386 }
            Abi::X86_64 => { &self.x86_64 }
            Abi::X32 => { &self.x32 }
        }
    }

    pub fn lookup(&self, abi : Abi, syscall : i64) -> Option<SyscallEntry> {
        self.table(abi).lookup(syscall)
    }

    pub fn build() -> SyscallTables {
        use EntryAction::ExecveEnter;
        use ExitAction::*;

        let i386 = SyscallTable::build(&[
            (  5, "open", None, Some(FileOpen(OpenKind::Open))),
            (  8, "creat", None, Some(FileOpen(OpenKind::Creat))),
            ( 33, "access", None, Some(FileOpen(OpenKind::Access))),

            (106, "stat", None, Some(FileStat)),
            (107, "lstat", None, Some(FileStat)),
            (195, "stat64", None, Some(FileStat)),
            ( 18, "oldstat", None, Some(FileStat)),
            (196, "lstat64", None, Some(FileStat)),
            ( 84, "oldlstat", None, Some(FileStat)),

            ( 85, "readlink", None, Some(Readlink)),

            ( 39, "mkdir", None, Some(Mkdir)),

            ( 83, "symlink", None, Some(Symlink { at : false })),

            ( 12, "chdir", None, Some(Chdir)),

            ( 11, "execve", Some(ExecveEnter), Some(ExecveExit { execve_syscall : EXECVE_I386 })),

            (  2, "fork", None, Some(Fork(ForkKind::Fork))),
            (190, "vfork", None, Some(Fork(ForkKind::Vfork))),
            (120, "clone", None, Some(Fork(ForkKind::Clone))),

            (102, "socketcall", None, Some(Socketcall)),

            // *at variants, handled when the descriptor is AT_FDCWD
            (296, "mkdirat", None, Some(AtAdapter { real_syscall : 39 })),
            (295, "openat", None, Some(AtAdapter { real_syscall : 5 })),
            (307, "faccessat", None, Some(AtAdapter { real_syscall : 33 })),
            (305, "readlinkat", None, Some(AtAdapter { real_syscall : 85 })),
            (300, "fstatat64", None, Some(AtAdapter { real_syscall : 195 })),

            (304, "symlinkat", None, Some(Symlink { at : true })),

            // Unhandled with a path as first argument
            ( 38, "rename", None, Some(UnhandledPath1)),
            ( 40, "rmdir", None, Some(UnhandledPath1)),
            (  9, "link", None, Some(UnhandledPath1)),
            ( 92, "truncate", None, Some(UnhandledPath1)),
            (193, "truncate64", None, Some(UnhandledPath1)),
            ( 10, "unlink", None, Some(UnhandledPath1)),
            ( 15, "chmod", None, Some(UnhandledPath1)),
            (182, "chown", None, Some(UnhandledPath1)),
            (212, "chown32", None, Some(UnhandledPath1)),
            ( 16, "lchown", None, Some(UnhandledPath1)),
            (198, "lchown32", None, Some(UnhandledPath1)),
            ( 30, "utime", None, Some(UnhandledPath1)),
            (271, "utimes", None, Some(UnhandledPath1)),
            (277, "mq_open", None, Some(UnhandledPath1)),
            (278, "mq_unlink", None, Some(UnhandledPath1)),

            // Unhandled which use open descriptors
            (303, "linkat", None, Some(UnhandledOther)),
            (302, "renameat", None, Some(UnhandledOther)),
            (301, "unlinkat", None, Some(UnhandledOther)),
            (306, "fchmodat", None, Some(UnhandledOther)),
            (298, "fchownat", None, Some(UnhandledOther)),

            // Other unhandled
            ( 26, "ptrace", None, Some(UnhandledOther)),
            (341, "name_to_handle_at", None, Some(UnhandledOther)),
        ]);

        let x86_64 = SyscallTable::build(&[
            (  2, "open", None, Some(FileOpen(OpenKind::Open))),
            ( 85, "creat", None, Some(FileOpen(OpenKind::Creat))),
            ( 21, "access", None, Some(FileOpen(OpenKind::Access))),

            (  4, "stat", None, Some(FileStat)),
            (  6, "lstat", None, Some(FileStat)),

            ( 89, "readlink", None, Some(Readlink)),

            ( 83, "mkdir", None, Some(Mkdir)),

            ( 88, "symlink", None, Some(Symlink { at : false })),

            ( 80, "chdir", None, Some(Chdir)),

            ( 59, "execve", Some(ExecveEnter), Some(ExecveExit { execve_syscall : EXECVE_X86_64 })),

            ( 57, "fork", None, Some(Fork(ForkKind::Fork))),
            ( 58, "vfork", None, Some(Fork(ForkKind::Vfork))),
            ( 56, "clone", None, Some(Fork(ForkKind::Clone))),

            ( 43, "accept", None, Some(Accept)),
            (288, "accept4", None, Some(Accept)),
            ( 42, "connect", None, Some(Connect)),

            // *at variants, handled when the descriptor is AT_FDCWD
            (258, "mkdirat", None, Some(AtAdapter { real_syscall : 83 })),
            (257, "openat", None, Some(AtAdapter { real_syscall : 2 })),
            (269, "faccessat", None, Some(AtAdapter { real_syscall : 21 })),
            (267, "readlinkat", None, Some(AtAdapter { real_syscall : 89 })),
            (262, "newfstatat", None, Some(AtAdapter { real_syscall : 4 })),

            (266, "symlinkat", None, Some(Symlink { at : true })),

            // Unhandled with a path as first argument
            ( 82, "rename", None, Some(UnhandledPath1)),
            ( 84, "rmdir", None, Some(UnhandledPath1)),
            ( 86, "link", None, Some(UnhandledPath1)),
            ( 76, "truncate", None, Some(UnhandledPath1)),
            ( 87, "unlink", None, Some(UnhandledPath1)),
            ( 90, "chmod", None, Some(UnhandledPath1)),
            ( 92, "chown", None, Some(UnhandledPath1)),
            ( 94, "lchown", None, Some(UnhandledPath1)),
            (132, "utime", None, Some(UnhandledPath1)),
            (235, "utimes", None, Some(UnhandledPath1)),
            (240, "mq_open", None, Some(UnhandledPath1)),
            (241, "mq_unlink", None, Some(UnhandledPath1)),

            // Unhandled which use open descriptors
            (265, "linkat", None, Some(UnhandledOther)),
            (264, "renameat", None, Some(UnhandledOther)),
            (263, "unlinkat", None, Some(UnhandledOther)),
            (268, "fchmodat", None, Some(UnhandledOther)),
            (260, "fchownat", None, Some(UnhandledOther)),

            // Other unhandled
            (101, "ptrace", None, Some(UnhandledOther)),
            (303, "name_to_handle_at", None, Some(UnhandledOther)),
        ]);

        // The x32 sub-ABI shares most numbers with native x86-64 but renumbers
        // the calls with pointer-heavy argument layouts, execve among them.
        let x32 = SyscallTable::build(&[
            (  2, "open", None, Some(FileOpen(OpenKind::Open))),
            ( 85, "creat", None, Some(FileOpen(OpenKind::Creat))),
            ( 21, "access", None, Some(FileOpen(OpenKind::Access))),

            (  4, "stat", None, Some(FileStat)),
            (  6, "lstat", None, Some(FileStat)),

            ( 89, "readlink", None, Some(Readlink)),

            ( 83, "mkdir", None, Some(Mkdir)),

            ( 88, "symlink", None, Some(Symlink { at : false })),

            ( 80, "chdir", None, Some(Chdir)),

            (520, "execve", Some(ExecveEnter), Some(ExecveExit { execve_syscall : EXECVE_X32 })),

            ( 57, "fork", None, Some(Fork(ForkKind::Fork))),
            ( 58, "vfork", None, Some(Fork(ForkKind::Vfork))),
            ( 56, "clone", None, Some(Fork(ForkKind::Clone))),

            ( 43, "accept", None, Some(Accept)),
            (288, "accept4", None, Some(Accept)),
            ( 42, "connect", None, Some(Connect)),

            // *at variants, handled when the descriptor is AT_FDCWD
            (258, "mkdirat", None, Some(AtAdapter { real_syscall : 83 })),
            (257, "openat", None, Some(AtAdapter { real_syscall : 2 })),
            (269, "faccessat", None, Some(AtAdapter { real_syscall : 21 })),
            (267, "readlinkat", None, Some(AtAdapter { real_syscall : 89 })),
            (262, "newfstatat", None, Some(AtAdapter { real_syscall : 4 })),

            (266, "symlinkat", None, Some(Symlink { at : true })),

            // Unhandled with a path as first argument
            ( 82, "rename", None, Some(UnhandledPath1)),
            ( 84, "rmdir", None, Some(UnhandledPath1)),
            ( 86, "link", None, Some(UnhandledPath1)),
            ( 76, "truncate", None, Some(UnhandledPath1)),
            ( 87, "unlink", None, Some(UnhandledPath1)),
            ( 90, "chmod", None, Some(UnhandledPath1)),
            ( 92, "chown", None, Some(UnhandledPath1)),
            ( 94, "lchown", None, Some(UnhandledPath1)),
            (132, "utime", None, Some(UnhandledPath1)),
            (235, "utimes", None, Some(UnhandledPath1)),
            (240, "mq_open", None, Some(UnhandledPath1)),
            (241, "mq_unlink", None, Some(UnhandledPath1)),

            // Unhandled which use open descriptors
            (265, "linkat", None, Some(UnhandledOther)),
            (264, "renameat", None, Some(UnhandledOther)),
            (263, "unlinkat", None, Some(UnhandledOther)),
            (268, "fchmodat", None, Some(UnhandledOther)),
            (260, "fchownat", None, Some(UnhandledOther)),

            // Other unhandled
            (521, "ptrace", None, Some(UnhandledOther)),
            (303, "name_to_handle_at", None, Some(UnhandledOther)),
        ]);

        SyscallTables { i386, x86_64, x32 }
    }
}
