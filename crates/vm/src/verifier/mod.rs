//! The bytecode verifier.
//!
//! Verification is the second, online phase of the two-phase scheme: the
//! class file arrives with stack maps produced ahead of time, and this
//! module re-checks every method against them by abstract interpretation.
//! Results are cached per class: a class is VERIFIED after every bytecode
//! method passes, and enters ERROR (with its verifier maps discarded) on
//! the first failure.

pub mod core;
pub mod stack_map;
pub mod types;

use log::debug;

use crate::class::{ClassId, ClassStatus};
use crate::error::{throwable, VmError, VmResult};
use crate::method::{MethodId, StackMaps};
use crate::vm::Vm;

use stack_map::PointerMap;

impl Vm {
    /// Verifies every bytecode method of `id`, once. Succeeding rewrites
    /// the stack-map tables into collector-oriented pointer bitmaps;
    /// failing marks the class erroneous and raises `VerifyError`.
    pub fn verify_class(&mut self, id: ClassId) -> VmResult<()> {
        {
            let class = self.classes.instance(id)?;
            match class.status {
                ClassStatus::Verified | ClassStatus::Ready => return Ok(()),
                ClassStatus::Error => {
                    let name = self.class_name_text(id);
                    return Err(VmError::throw(throwable::NO_CLASS_DEF, name));
                }
                ClassStatus::Linked => {}
                _ => return Err(VmError::internal("verifying an unlinked class")),
            }
        }

        let method_count = self.classes.instance(id)?.methods.len() as u16;
        for index in 0..method_count {
            let method = MethodId { class: id, index };
            if self.method(method)?.bytecode().is_none() {
                continue;
            }
            if let Err(err) = core::verify_method(self, method) {
                if matches!(&err, VmError::Throw { class_name, .. }
                    if class_name == throwable::VERIFY)
                {
                    // The table is discarded and the class enters ERROR.
                    let class = self.classes.instance_mut(id)?;
                    class.status = ClassStatus::Error;
                    for m in class.methods.iter_mut() {
                        if let Some(body) = m.bytecode_mut() {
                            body.stack_maps = StackMaps::Absent;
                        }
                    }
                }
                return Err(err);
            }
        }

        // Post-processing: collapse the type-tag maps into pointer maps.
        let class = self.classes.instance_mut(id)?;
        for method in class.methods.iter_mut() {
            if let Some(body) = method.bytecode_mut() {
                if let StackMaps::Verifier(maps) = &body.stack_maps {
                    let pointer = maps.iter().map(PointerMap::from_recorded).collect();
                    body.stack_maps = StackMaps::Pointer(pointer);
                }
            }
        }
        class.status = ClassStatus::Verified;
        debug!("verifier: class verified");
        Ok(())
    }
}
