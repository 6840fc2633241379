//! Exception materialisation and propagation.
//!
//! A `VmError::Throw` reaching the run loop is turned into a heap object
//! here, then walked down the current thread's frame stack: each frame's
//! handler table is searched for a row covering the faulting opcode whose
//! catch type accepts the thrown class; on a miss the frame is popped
//! (releasing its synchronised-method monitor) and the search repeats. A
//! thread whose frames are exhausted dies; if it was the last live
//! non-daemon thread, the VM exits.

use log::{debug, warn};

use crate::class::ClassId;
use crate::error::{VmError, VmResult};
use crate::frame::FrameKind;
use crate::object::ObjRef;
use crate::vm::Vm;

impl Vm {
    /// Routes a `VmError::Throw` to the handler search of the current
    /// thread.
    pub(crate) fn dispatch_throw(&mut self, err: VmError) -> VmResult<()> {
        let VmError::Throw {
            class_name,
            message,
            object,
        } = err
        else {
            return Err(VmError::internal("dispatch_throw on a fatal error"));
        };

        let exception = match object {
            Some(raw) => ObjRef(raw),
            None => self.materialize_throwable(&class_name, &message)?,
        };
        self.propagate_exception(exception, &class_name, &message)
    }

    /// Builds a throwable instance of `class_name`, storing `message` into
    /// a `message` string field when the class hierarchy declares one.
    /// A failure to build the throwable itself is fatal: the embedder's
    /// classpath is broken.
    pub(crate) fn materialize_throwable(
        &mut self,
        class_name: &str,
        message: &str,
    ) -> VmResult<ObjRef> {
        let class = self.load_class_by_name(class_name).map_err(|err| {
            VmError::internal(format!(
                "cannot materialise {class_name}: {err}"
            ))
        })?;
        let exception = self.alloc_instance_of(class)?;

        if !message.is_empty() {
            if let Some((offset, _)) = self.find_instance_field(
                class,
                self.known.message_name,
                self.known.string_descriptor,
            ) {
                let text = self.alloc_string_object(message)?;
                if let crate::object::ObjectBody::Instance(fields) =
                    &mut self.obj_mut(exception)?.body
                {
                    fields[offset as usize] = text.0;
                }
            }
        }
        Ok(exception)
    }

    /// Finds an instance field by name/descriptor along the superclass
    /// chain, returning its payload offset and declaring class.
    pub(crate) fn find_instance_field(
        &self,
        class: ClassId,
        name: crate::intern::NameKey,
        descriptor: crate::intern::NameKey,
    ) -> Option<(u16, ClassId)> {
        let mut cursor = Some(class);
        while let Some(id) = cursor {
            let c = self.classes.class(id).as_instance()?;
            if let Some(index) = c.find_field(name, descriptor) {
                let field = &c.fields[index as usize];
                if !field.is_static() {
                    return Some((field.offset, id));
                }
            }
            cursor = c.super_class;
        }
        None
    }

    /// The §4.6 walk: search the current frame's handler table, pop on
    /// miss, repeat. On a hit, control transfers to the handler with the
    /// operand stack holding exactly the exception.
    fn propagate_exception(
        &mut self,
        exception: ObjRef,
        class_name: &str,
        message: &str,
    ) -> VmResult<()> {
        let thrown_class = self.obj(exception)?.class;
        let object_class = self.object_class()?;

        enum Unwind {
            Bottom,
            Barrier(Option<ClassId>),
            Search(crate::method::MethodId, u16),
        }

        loop {
            let step = match self.current_thread()?.frame() {
                None => Unwind::Bottom,
                Some(frame) => match &frame.kind {
                    FrameKind::ThreadBootstrap => Unwind::Bottom,
                    FrameKind::ClinitBarrier { running, .. } => Unwind::Barrier(*running),
                    FrameKind::Normal => Unwind::Search(frame.method, frame.opcode_ip as u16),
                },
            };

            let (method, throw_ip) = match step {
                Unwind::Bottom => break,
                Unwind::Barrier(running) => {
                    // A throw out of <clinit> marks the class erroneous;
                    // the barrier itself has no handlers.
                    if let Some(class_id) = running {
                        let class = self.classes.instance_mut(class_id)?;
                        class.status = crate::class::ClassStatus::Error;
                        class.init_thread = None;
                        warn!("clinit: initialisation failed, class marked erroneous");
                    }
                    self.pop_frame()?;
                    continue;
                }
                Unwind::Search(method, throw_ip) => (method, throw_ip),
            };

            let handlers = self.bytecode(method)?.handlers.clone();

            let mut matched = None;
            for handler in &handlers {
                if throw_ip < handler.start_pc || throw_ip >= handler.end_pc {
                    continue;
                }
                if handler.catch_type == 0 {
                    matched = Some(handler.handler_pc);
                    break;
                }
                let catch_class = self.resolve_pool_class(method.class, handler.catch_type)?;
                if self
                    .classes
                    .is_assignable(thrown_class, catch_class, object_class)
                {
                    matched = Some(handler.handler_pc);
                    break;
                }
            }

            if let Some(handler_pc) = matched {
                let frame = self.frame_mut()?;
                frame.stack.clear();
                frame.push_ref(exception);
                frame.ip = handler_pc as usize;
                frame.opcode_ip = handler_pc as usize;
                debug!("throw: {class_name} caught at pc {handler_pc}");
                return Ok(());
            }

            // No handler here: release the synchronised-method monitor and
            // unwind one frame.
            let sync_object = self.frame()?.sync_object;
            if !sync_object.is_null() {
                if let Err(err) = self.monitor_exit(sync_object) {
                    warn!("throw: monitor release during unwind failed: {err}");
                }
            }
            self.pop_frame()?;
        }

        // Uncaught: the thread dies.
        let id = self.current_id()?;
        debug!("throw: {class_name} uncaught, thread {} dies", id.0);
        if let Some(events) = self.events.as_mut() {
            events.uncaught_exception(id, class_name, message);
        }
        self.kill_current_thread()
    }
}
