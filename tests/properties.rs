//! Property tests for the pure tensor utilities.

use mlcore::tensor::Tensor;
use mlcore::tensor_utils::{
  Rect, argmax, inverse_permutation, iou, nms, reshape, softmax, top_k, transpose,
};
use proptest::prelude::*;

fn tensor_strategy() -> impl Strategy<Value = Tensor> {
  prop::collection::vec(1usize..4, 1..5).prop_flat_map(|dims| {
    let size: usize = dims.iter().product();
    prop::collection::vec(-100.0f32..100.0, size)
      .prop_map(move |values| Tensor::from_f32(values, dims.clone()).unwrap())
  })
}

fn tensor_and_perm() -> impl Strategy<Value = (Tensor, Vec<usize>)> {
  tensor_strategy().prop_flat_map(|tensor| {
    let rank = tensor.rank();
    (Just(tensor), Just((0..rank).collect::<Vec<_>>()).prop_shuffle())
  })
}

fn boxes_and_scores() -> impl Strategy<Value = (Vec<Rect>, Vec<f32>)> {
  prop::collection::vec(
    (0.0f32..100.0, 0.0f32..100.0, 1.0f32..40.0, 1.0f32..40.0, 0.0f32..1.0),
    0..25,
  )
  .prop_map(|rows| {
    rows
      .into_iter()
      .map(|(x, y, w, h, s)| (Rect::new(x, y, w, h), s))
      .unzip()
  })
}

proptest! {
  #[test]
  fn reshape_round_trips(tensor in tensor_strategy()) {
    let flat = reshape(&tensor, &[tensor.size()]).unwrap();
    let back = reshape(&flat, tensor.dims()).unwrap();
    prop_assert_eq!(back, tensor);
  }

  #[test]
  fn transpose_inverse_restores_input((tensor, perm) in tensor_and_perm()) {
    let permuted = transpose(&tensor, &perm).unwrap();
    for (axis, &source) in perm.iter().enumerate() {
      prop_assert_eq!(permuted.dims()[axis], tensor.dims()[source]);
    }
    let restored = transpose(&permuted, &inverse_permutation(&perm)).unwrap();
    prop_assert_eq!(restored, tensor);
  }

  #[test]
  fn softmax_is_a_distribution(tensor in tensor_strategy()) {
    let out = softmax(&tensor).unwrap().to_f32_vec();
    let sum: f32 = out.iter().sum();
    prop_assert!((sum - 1.0).abs() < 1e-4);
    prop_assert!(out.iter().all(|&p| (0.0..=1.0).contains(&p)));
  }

  #[test]
  fn softmax_ignores_constant_shift(
    values in prop::collection::vec(-20.0f32..20.0, 1..16),
    shift in -10.0f32..10.0,
  ) {
    let n = values.len();
    let base = softmax(&Tensor::from_f32(values.clone(), vec![n]).unwrap()).unwrap();
    let shifted_values: Vec<f32> = values.iter().map(|v| v + shift).collect();
    let shifted = softmax(&Tensor::from_f32(shifted_values, vec![n]).unwrap()).unwrap();
    for (a, b) in base.to_f32_vec().iter().zip(shifted.to_f32_vec()) {
      prop_assert!((a - b).abs() < 1e-4);
    }
  }

  #[test]
  fn top_k_is_sorted_and_bounded(tensor in tensor_strategy(), k in 0usize..10) {
    let top = top_k(&tensor, k);
    prop_assert_eq!(top.values.len(), k.min(tensor.size()));
    prop_assert!(top.values.windows(2).all(|w| w[0] >= w[1]));
    let values = tensor.to_f32_vec();
    for (&i, &v) in top.indices.iter().zip(&top.values) {
      prop_assert_eq!(values[i], v);
    }
  }

  #[test]
  fn argmax_points_at_a_maximum(tensor in tensor_strategy()) {
    let values = tensor.to_f32_vec();
    let best = argmax(&tensor).unwrap();
    prop_assert!(values.iter().all(|&v| v <= values[best]));
    prop_assert!(values[..best].iter().all(|&v| v < values[best]));
  }

  #[test]
  fn nms_selection_is_sorted_and_separated(
    (boxes, scores) in boxes_and_scores(),
    iou_threshold in 0.1f32..0.9,
    score_threshold in 0.0f32..0.5,
  ) {
    let kept = nms(&boxes, &scores, iou_threshold, score_threshold).unwrap();
    prop_assert!(kept.windows(2).all(|w| scores[w[0]] >= scores[w[1]]));
    prop_assert!(kept.iter().all(|&i| scores[i] >= score_threshold));
    for (n, &a) in kept.iter().enumerate() {
      for &b in &kept[n + 1..] {
        prop_assert!(a != b);
        prop_assert!(iou(&boxes[a], &boxes[b]) <= iou_threshold);
      }
    }
  }

  #[test]
  fn nms_is_idempotent(
    (boxes, scores) in boxes_and_scores(),
    iou_threshold in 0.1f32..0.9,
  ) {
    let kept = nms(&boxes, &scores, iou_threshold, 0.0).unwrap();
    let kept_boxes: Vec<Rect> = kept.iter().map(|&i| boxes[i]).collect();
    let kept_scores: Vec<f32> = kept.iter().map(|&i| scores[i]).collect();
    let again = nms(&kept_boxes, &kept_scores, iou_threshold, 0.0).unwrap();
    prop_assert_eq!(again, (0..kept.len()).collect::<Vec<_>>());
  }

  #[test]
  fn nms_keeps_disjoint_boxes(scores in prop::collection::vec(0.0f32..1.0, 1..12)) {
    let boxes: Vec<Rect> = (0..scores.len())
      .map(|i| Rect::new(i as f32 * 20.0, 0.0, 10.0, 10.0))
      .collect();
    let kept = nms(&boxes, &scores, 0.5, 0.0).unwrap();
    prop_assert_eq!(kept.len(), boxes.len());
    prop_assert!(kept.windows(2).all(|w| scores[w[0]] >= scores[w[1]]));
  }
}
