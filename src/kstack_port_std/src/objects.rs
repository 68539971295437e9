//! The object table, which gives kernel objects handles that can be passed
//! through the call gate, and the table of memory regions accessible through
//! the call gate
use kstack_kernel::{KernelTraits, Stack, Word};
use slab::Slab;
use spin::Mutex as SpinMutex;
use std::{mem, ops::Range};

use crate::{PortInstance, State};

/// A handle to a stack registered by [`register_stack`].
///
/// Handles are recycled after [`unregister_stack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackHandle(usize);

pub(crate) struct ObjectTable<Traits: KernelTraits> {
    /// Created on first use.
    stacks: SpinMutex<Option<Slab<&'static Stack<Traits>>>>,
    user_memory: SpinMutex<Vec<Range<usize>>>,
}

impl<Traits: KernelTraits> ObjectTable<Traits> {
    pub(crate) const fn new() -> Self {
        Self {
            stacks: SpinMutex::new(None),
            user_memory: SpinMutex::new(Vec::new()),
        }
    }
}

impl<Traits: PortInstance> State<Traits> {
    pub fn stack_from_handle(&self, handle: StackHandle) -> Option<&'static Stack<Traits>> {
        let stacks = self.objects.stacks.lock();
        stacks.as_ref()?.get(handle.0).copied()
    }

    pub fn is_user_writable(&self, addr: usize, len: usize) -> bool {
        let Some(end) = addr.checked_add(len) else {
            return false;
        };
        (self.objects.user_memory.lock())
            .iter()
            .any(|region| region.start <= addr && end <= region.end)
    }
}

/// Register `stack` to the object table, making it accessible through the
/// call gate and [`for_each_stack`].
pub fn register_stack<Traits: PortInstance>(stack: &'static Stack<Traits>) -> StackHandle {
    let mut stacks = Traits::port_state().objects.stacks.lock();
    let handle = StackHandle(stacks.get_or_insert_with(Slab::new).insert(stack));
    log::debug!("registered the stack {:p} as {handle:?}", stack);
    handle
}

/// Remove the stack referred to by `handle` from the object table. Returns
/// `None` if `handle` is not registered.
pub fn unregister_stack<Traits: PortInstance>(handle: StackHandle) -> Option<&'static Stack<Traits>> {
    let mut stacks = Traits::port_state().objects.stacks.lock();
    let stacks = stacks.as_mut()?;
    if !stacks.contains(handle.0) {
        return None;
    }
    let stack = stacks.remove(handle.0);
    log::debug!("unregistered the stack {:p} ({handle:?})", stack);
    Some(stack)
}

/// Call `f` for each registered stack, in no particular order.
///
/// `f` is called with a snapshot of the object table, so it may register or
/// unregister stacks.
pub fn for_each_stack<Traits: PortInstance>(mut f: impl FnMut(StackHandle, &'static Stack<Traits>)) {
    let snapshot: Vec<_> = match &*Traits::port_state().objects.stacks.lock() {
        Some(stacks) => stacks
            .iter()
            .map(|(i, stack)| (StackHandle(i), *stack))
            .collect(),
        None => Vec::new(),
    };

    for (handle, stack) in snapshot {
        f(handle, stack);
    }
}

/// Make `region` accessible through the call gate, returning its address.
///
/// The region is handed over to the kernel for good; nothing but the call
/// gate accesses it afterwards.
pub fn grant_user_memory<Traits: PortInstance>(region: &'static mut [Word]) -> usize {
    let start = region.as_mut_ptr() as usize;
    let end = start + mem::size_of_val(&*region);
    log::debug!("granting {start:#x}..{end:#x}");
    Traits::port_state().objects.user_memory.lock().push(start..end);
    start
}
