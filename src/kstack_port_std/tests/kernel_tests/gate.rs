//! The call gate validates handles, memory regions, and raw parameters.
use kstack_kernel::{
    gate::{stack_init, stack_pop, stack_push},
    ResultCode, Stack, StackInitError, StackPopError, StackPushError, Word,
};
use kstack_port_std::{
    for_each_stack, grant_user_memory, register_stack, run_in_interrupt, spawn_task,
    unregister_stack, PortInstance,
};

pub trait SupportedSystemTraits: PortInstance {}
impl<T: PortInstance> SupportedSystemTraits for T {}

pub fn run<Traits: SupportedSystemTraits>() {
    let stack: &'static Stack<Traits> = Box::leak(Box::new(Stack::new()));
    let handle = register_stack(stack);

    // A handle that doesn't refer to anything
    let other: &'static Stack<Traits> = Box::leak(Box::new(Stack::new()));
    let stale = register_stack(other);
    assert!(unregister_stack::<Traits>(stale).is_some());
    assert!(unregister_stack::<Traits>(stale).is_none());

    let buffer = grant_user_memory::<Traits>(vec![0; 8].leak());
    let out = grant_user_memory::<Traits>(vec![0; 1].leak());
    let private = vec![0 as Word; 4].leak().as_mut_ptr() as usize;
    // Safety: `out` points to a leaked allocation
    let read_out = move || unsafe { *(out as *const Word) };

    spawn_task::<Traits, _>(1, move || {
        // stack_init
        assert_eq!(stack_init::<Traits>(handle, buffer, 0), Err(StackInitError::BadParam));
        assert_eq!(stack_init::<Traits>(handle, buffer, -1), Err(StackInitError::BadParam));
        // `num_entries` is checked before the handle
        assert_eq!(stack_init::<Traits>(stale, buffer, 0), Err(StackInitError::BadParam));
        assert_eq!(stack_init::<Traits>(stale, buffer, 4), Err(StackInitError::NoAccess));
        assert_eq!(stack_init::<Traits>(handle, 0, 1), Err(StackInitError::NoAccess));
        assert_eq!(stack_init::<Traits>(handle, buffer + 1, 4), Err(StackInitError::NoAccess));
        assert_eq!(stack_init::<Traits>(handle, private, 4), Err(StackInitError::NoAccess));
        assert_eq!(stack_init::<Traits>(handle, buffer, 9), Err(StackInitError::NoAccess));
        assert_eq!(stack_init::<Traits>(handle, buffer + 4, 8), Err(StackInitError::NoAccess));
        assert_eq!(stack.capacity(), 0);

        assert_eq!(stack_init::<Traits>(handle, buffer, 2), Ok(()));
        assert_eq!(stack.capacity(), 2);

        // stack_push
        assert_eq!(stack_push::<Traits>(handle, 5), Ok(()));
        assert_eq!(stack_push::<Traits>(handle, 6), Ok(()));
        assert_eq!(stack_push::<Traits>(handle, 7), Err(StackPushError::QueueOverflow));
        assert_eq!(stack_push::<Traits>(stale, 7), Err(StackPushError::NoAccess));
        assert_eq!(stack.len(), 2);
        assert_eq!(
            ResultCode::from(stack_push::<Traits>(handle, 7)),
            ResultCode::QueueOverflow
        );
        assert_eq!(ResultCode::QueueOverflow as i8, -12);
        assert!(ResultCode::QueueOverflow.is_err());
        assert!(!ResultCode::QueueOverflow.is_ok());
        assert!(ResultCode::from(stack_push::<Traits>(stale, 7)).is_err());

        // stack_pop
        assert_eq!(stack_pop::<Traits>(handle, out, 0), Ok(()));
        assert_eq!(read_out(), 6);

        assert_eq!(stack_pop::<Traits>(handle, out, -2), Err(StackPopError::BadParam));
        assert_eq!(stack_pop::<Traits>(handle, private, 0), Err(StackPopError::NoAccess));
        assert_eq!(stack_pop::<Traits>(handle, out + 1, 0), Err(StackPopError::NoAccess));
        assert_eq!(stack_pop::<Traits>(stale, out, 0), Err(StackPopError::NoAccess));
        // The failed calls neither consumed the value nor wrote the output
        assert_eq!(stack.len(), 1);
        assert_eq!(read_out(), 6);

        assert_eq!(stack_pop::<Traits>(handle, out, 100), Ok(()));
        assert_eq!(read_out(), 5);

        assert_eq!(stack_pop::<Traits>(handle, out, 0), Err(StackPopError::WouldBlock));
        assert_eq!(
            ResultCode::from(stack_pop::<Traits>(handle, out, 0)),
            ResultCode::WouldBlock
        );
        assert_eq!(stack_pop::<Traits>(handle, out, 20), Err(StackPopError::Timeout));
        assert_eq!(read_out(), 5);
        let code = ResultCode::from(stack_init::<Traits>(handle, buffer, 2));
        assert_eq!(code, ResultCode::Success);
        assert!(code.is_ok());
        assert!(!code.is_err());
    })
    .join();

    // The gate in an interrupt context
    run_in_interrupt::<Traits, _>(move || {
        assert_eq!(stack_pop::<Traits>(handle, out, -1), Err(StackPopError::BadContext));
        assert_eq!(stack_push::<Traits>(handle, 8), Ok(()));
        assert_eq!(stack_pop::<Traits>(handle, out, -1), Ok(()));
        assert_eq!(read_out(), 8);
    });

    let mut handles = Vec::new();
    for_each_stack::<Traits>(|h, s| {
        assert!(std::ptr::eq(s, stack));
        handles.push(h);
    });
    assert_eq!(handles, [handle]);

    let removed = unregister_stack::<Traits>(handle).unwrap();
    assert!(std::ptr::eq(removed, stack));
    for_each_stack::<Traits>(|_, _| unreachable!());
}
